//! The link step: expose a keg inside the shared prefix.
//!
//! After a build, the keg's directories are symlinked into the global prefix
//! so the logical paths baked into the binaries resolve:
//!
//! - `{prefix}/opt/{name}` points at the keg itself (the stable opt-path
//!   other packages build against);
//! - shared role trees (`share`, `lib`) are exposed at their qualified
//!   configure-phase locations;
//! - `bin` and man page children are linked individually into the prefix's
//!   own `bin`/`share/man` directories, which is exactly where same-named
//!   artifacts from sibling majors would collide and why they carry a suffix
//!   by the time this runs.
//!
//! Linking is idempotent. A destination already owned by another keg is
//! merged by materializing the directory and linking both kegs' children;
//! anything else in the way is an error rather than silently replaced.

use anyhow::{Context, Result, bail};
use log::debug;
use std::path::Path;

use super::{LayoutRole, LayoutSpec, Phase};
use crate::runtime::{Runtime, is_path_under, relative_symlink_path};

/// Link one keg into the prefix. Returns the number of symlinks created.
#[tracing::instrument(skip(runtime, spec))]
pub fn link_keg(
    runtime: &dyn Runtime,
    spec: &LayoutSpec,
    name: &str,
    cellar: &Path,
) -> Result<usize> {
    let mut created = 0;

    let opt_link = spec.prefix.join("opt").join(name);
    runtime
        .create_dir_all(&spec.prefix.join("opt"))
        .context("Failed to create opt directory")?;
    created += link_node(runtime, &spec.sandbox, &opt_link, cellar)?;

    // Shared trees at their qualified logical locations.
    for role in [LayoutRole::Data, LayoutRole::Lib] {
        let source = spec.resolve(role, Phase::Install);
        if !runtime.is_dir(&source) {
            continue;
        }
        let dest = spec.resolve(role, Phase::Configure);
        created += link_node(runtime, &source, &dest, cellar)?;
    }

    // User-facing executables and man pages go into the prefix's own
    // directories, one child at a time.
    for (source, dest) in [
        (spec.sandbox.join("bin"), spec.prefix.join("bin")),
        (
            spec.sandbox.join("share/man/man1"),
            spec.prefix.join("share/man/man1"),
        ),
    ] {
        if !runtime.is_dir(&source) {
            continue;
        }
        runtime
            .create_dir_all(&dest)
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        created += link_children(runtime, &source, &dest, cellar)?;
    }

    Ok(created)
}

/// Link `source` at `dest`, merging with a sibling keg's tree if one is
/// already linked there.
fn link_node(
    runtime: &dyn Runtime,
    source: &Path,
    dest: &Path,
    cellar: &Path,
) -> Result<usize> {
    if runtime.is_symlink(dest) {
        let target = runtime.resolve_link(dest)?;
        if target == source {
            debug!("{} already linked", dest.display());
            return Ok(0);
        }
        if !is_path_under(&target, cellar) {
            bail!(
                "Refusing to replace {}: it points outside the cellar ({})",
                dest.display(),
                target.display()
            );
        }
        // Another keg owns this node. Materialize the directory and link
        // both kegs' children into it.
        if runtime.is_dir(&target) && runtime.is_dir(source) {
            debug!(
                "Merging {} with already-linked {}",
                source.display(),
                target.display()
            );
            runtime.remove_symlink(dest)?;
            runtime.create_dir_all(dest)?;
            let mut created = link_children(runtime, &target, dest, cellar)?;
            created += link_children(runtime, source, dest, cellar)?;
            return Ok(created);
        }
        // A stale file link from an older build of the same family.
        runtime.remove_symlink(dest)?;
        return create_link(runtime, source, dest);
    }

    if runtime.exists(dest) {
        if runtime.is_dir(dest) && runtime.is_dir(source) {
            return link_children(runtime, source, dest, cellar);
        }
        bail!(
            "Cannot link {}: {} exists and is not a directory",
            source.display(),
            dest.display()
        );
    }

    if let Some(parent) = dest.parent() {
        runtime
            .create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    create_link(runtime, source, dest)
}

fn link_children(
    runtime: &dyn Runtime,
    source_dir: &Path,
    dest_dir: &Path,
    cellar: &Path,
) -> Result<usize> {
    let mut created = 0;
    for child in runtime.read_dir(source_dir)? {
        let file_name = child
            .file_name()
            .with_context(|| format!("Entry without a file name in {}", source_dir.display()))?;
        created += link_node(runtime, &child, &dest_dir.join(file_name), cellar)?;
    }
    Ok(created)
}

fn create_link(runtime: &dyn Runtime, source: &Path, dest: &Path) -> Result<usize> {
    let target = relative_symlink_path(dest, source).unwrap_or_else(|| source.to_path_buf());
    runtime
        .symlink(&target, dest)
        .with_context(|| format!("Failed to link {} at {}", source.display(), dest.display()))?;
    Ok(1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::layout::LayoutSpec;
    use crate::runtime::RealRuntime;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test_log::test]
    fn test_link_keg_exposes_opt_shared_and_bin() {
        let runtime = RealRuntime;
        let root = tempdir().unwrap();
        let prefix = root.path().join("prefix");
        let cellar = prefix.join("cellar");
        let keg = cellar.join("engine@16").join("16.3");

        touch(&keg.join("bin/psql-16"));
        touch(&keg.join("share/extension.control"));
        touch(&keg.join("lib/engine@16/plugin.so"));
        touch(&keg.join("share/man/man1/psql-16.1"));
        fs::create_dir_all(&prefix).unwrap();

        let spec = LayoutSpec::new(&prefix, &keg, "engine@16");
        let created = link_keg(&runtime, &spec, "engine@16", &cellar).unwrap();
        assert!(created >= 4);

        assert_eq!(runtime.resolve_link(&prefix.join("opt/engine@16")).unwrap(), keg);
        assert_eq!(
            runtime
                .resolve_link(&prefix.join("share/engine@16"))
                .unwrap(),
            keg.join("share")
        );
        assert_eq!(
            runtime.resolve_link(&prefix.join("lib/engine@16")).unwrap(),
            keg.join("lib/engine@16")
        );
        assert!(prefix.join("bin/psql-16").exists());
        assert!(prefix.join("share/man/man1/psql-16.1").exists());

        // Linking again is a no-op.
        let again = link_keg(&runtime, &spec, "engine@16", &cellar).unwrap();
        assert_eq!(again, 0);
    }

    #[test_log::test]
    fn test_link_keg_merges_extension_into_engine_tree() {
        let runtime = RealRuntime;
        let root = tempdir().unwrap();
        let prefix = root.path().join("prefix");
        let cellar = prefix.join("cellar");

        let engine_keg = cellar.join("engine@16").join("16.3");
        touch(&engine_keg.join("share/engine.sql"));
        fs::create_dir_all(&prefix).unwrap();

        let engine = LayoutSpec::new(&prefix, &engine_keg, "engine@16");
        link_keg(&runtime, &engine, "engine@16", &cellar).unwrap();

        // The extension's shared data is qualified with the engine's name.
        let ext_keg = cellar.join("ext@16").join("3.4.2");
        touch(&ext_keg.join("share/engine@16/contrib/ext.sql"));
        let ext = LayoutSpec::new(&prefix, &ext_keg, "engine@16")
            .with_private_role(LayoutRole::Data);
        link_keg(&runtime, &ext, "ext@16", &cellar).unwrap();

        // Both kegs' files are observable under the one shared tree.
        let shared = prefix.join("share/engine@16");
        assert!(shared.join("engine.sql").exists());
        assert!(shared.join("contrib/ext.sql").exists());
    }

    #[test]
    fn test_link_keg_refuses_foreign_symlinks() {
        let runtime = RealRuntime;
        let root = tempdir().unwrap();
        let prefix = root.path().join("prefix");
        let cellar = prefix.join("cellar");
        let keg = cellar.join("engine@16").join("16.3");
        touch(&keg.join("share/engine.sql"));

        // Someone else owns the destination.
        let foreign = root.path().join("foreign");
        fs::create_dir_all(&foreign).unwrap();
        fs::create_dir_all(prefix.join("share")).unwrap();
        std::os::unix::fs::symlink(&foreign, prefix.join("share/engine@16")).unwrap();

        let spec = LayoutSpec::new(&prefix, &keg, "engine@16");
        let err = link_keg(&runtime, &spec, "engine@16", &cellar).unwrap_err();
        assert!(err.to_string().contains("outside the cellar"));
    }
}
