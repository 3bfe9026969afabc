//! Artifact renaming for co-installed sibling versions.
//!
//! Two builds of the same extension family for different engine majors would
//! install same-named executables and man pages. Before a keg is linked into
//! the shared prefix, every file in its bin/man directories gets the engine
//! major as a suffix: `shp2pgsql` becomes `shp2pgsql-16`, `shp2pgsql.1`
//! becomes `shp2pgsql-16.1`. The shared datadir tree is never renamed.
//!
//! The rename is NOT re-entrant: applied twice it produces `shp2pgsql-16-16`.
//! Kegs are built once into a fresh sandbox, so re-application does not occur
//! in normal operation; the behavior is pinned by test rather than guarded.

use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

/// Rename one file to `{base}-{suffix}{ext}`, preserving the extension.
pub fn add_suffix(runtime: &dyn Runtime, file: &Path, suffix: &str) -> Result<PathBuf> {
    let dir = file
        .parent()
        .with_context(|| format!("No parent directory for {}", file.display()))?;
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("No file name in {}", file.display()))?;

    let renamed = match file.extension().and_then(|e| e.to_str()) {
        Some(ext) => dir.join(format!("{stem}-{suffix}.{ext}")),
        None => dir.join(format!("{stem}-{suffix}")),
    };

    runtime
        .rename(file, &renamed)
        .with_context(|| format!("Failed to rename {}", file.display()))?;
    Ok(renamed)
}

/// Suffix every file currently present in `dir`. Files are renamed eagerly
/// and independently; there is no ordering dependency. A missing directory
/// is fine (e.g. a package without man pages).
#[tracing::instrument(skip(runtime))]
pub fn disambiguate_dir(
    runtime: &dyn Runtime,
    dir: &Path,
    suffix: &str,
) -> Result<Vec<PathBuf>> {
    if !runtime.is_dir(dir) {
        debug!("No {} to disambiguate", dir.display());
        return Ok(Vec::new());
    }

    let mut renamed = Vec::new();
    for file in runtime.read_dir(dir)? {
        renamed.push(add_suffix(runtime, &file, suffix)?);
    }
    debug!("Suffixed {} artifact(s) in {}", renamed.len(), dir.display());
    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{RealRuntime, Runtime};
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::tempdir;

    fn names(dir: &Path) -> BTreeSet<String> {
        RealRuntime
            .read_dir(dir)
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_suffix_inserted_before_extension() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        for name in ["a", "a.1", "b"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        disambiguate_dir(&runtime, dir.path(), "16").unwrap();

        assert_eq!(
            names(dir.path()),
            BTreeSet::from(["a-16".to_string(), "a-16.1".to_string(), "b-16".to_string()])
        );
    }

    // Double application is known to be unsafe, not guarded against. The
    // double suffix is asserted here so a behavior change is noticed.
    #[test]
    fn test_double_application_double_suffixes() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), b"").unwrap();

        disambiguate_dir(&runtime, dir.path(), "16").unwrap();
        disambiguate_dir(&runtime, dir.path(), "16").unwrap();

        assert_eq!(names(dir.path()), BTreeSet::from(["a-16-16".to_string()]));
    }

    #[test]
    fn test_missing_directory_is_a_noop() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let renamed =
            disambiguate_dir(&runtime, &dir.path().join("share/man/man1"), "16").unwrap();
        assert!(renamed.is_empty());
    }

    #[test]
    fn test_man_page_keeps_section_extension() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("tool"), b"").unwrap();
        fs::write(dir.path().join("tool.1"), b"").unwrap();

        let renamed = disambiguate_dir(&runtime, dir.path(), "16").unwrap();
        let renamed: BTreeSet<_> = renamed
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            renamed,
            BTreeSet::from(["tool-16".to_string(), "tool-16.1".to_string()])
        );
    }
}
