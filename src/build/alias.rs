//! Build-time binary alias.
//!
//! The extension's build system assumes it is installed next to the engine
//! and looks for the `postgres` executable relative to its own `bindir`. It
//! links against that binary for symbols the public libraries do not export,
//! so without the alias the build fails later with confusing undefined-symbol
//! errors. The alias is a symlink created for the duration of the build and
//! never shipped.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

/// A scoped symlink to another package's executable inside this package's
/// bin directory.
///
/// Dropping the guard removes the link, so it is released on every exit path
/// including build failure. The success path calls [`BinaryAlias::remove`]
/// so removal errors are reported instead of swallowed.
pub struct BinaryAlias<'a> {
    runtime: &'a dyn Runtime,
    link: PathBuf,
    released: bool,
}

impl<'a> BinaryAlias<'a> {
    /// Create the alias: `bin_dir/{executable's file name}` pointing at
    /// `executable`. The bin directory is created if missing.
    ///
    /// The target is not checked for existence here; a missing engine
    /// executable surfaces later as a link error in the dependent build.
    #[tracing::instrument(skip(runtime))]
    pub fn create(
        runtime: &'a dyn Runtime,
        executable: &Path,
        bin_dir: &Path,
    ) -> Result<Self> {
        runtime
            .create_dir_all(bin_dir)
            .with_context(|| format!("Failed to create {}", bin_dir.display()))?;

        let name = executable
            .file_name()
            .with_context(|| format!("No file name in {}", executable.display()))?;
        let link = bin_dir.join(name);

        runtime
            .symlink(executable, &link)
            .with_context(|| format!("Failed to create alias at {}", link.display()))?;
        debug!("Aliased {} at {}", executable.display(), link.display());

        Ok(Self {
            runtime,
            link,
            released: false,
        })
    }

    pub fn link_path(&self) -> &Path {
        &self.link
    }

    /// Remove the alias, consuming the guard. Called on the success path so
    /// that a failure to remove is an error rather than a shipped artifact.
    pub fn remove(mut self) -> Result<()> {
        self.released = true;
        self.runtime
            .remove_symlink(&self.link)
            .with_context(|| format!("Failed to remove alias at {}", self.link.display()))
    }
}

impl Drop for BinaryAlias<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.runtime.remove_symlink(&self.link) {
            warn!("Failed to remove alias at {}: {e:#}", self.link.display());
        }
    }
}

/// Best-effort sweep for a leftover alias before artifacts are finalized. A
/// dangling or foreign binary must never be shipped, so this runs even though
/// the guard normally removed the link already.
pub fn remove_stale(runtime: &dyn Runtime, bin_dir: &Path, name: &str) {
    let link = bin_dir.join(name);
    if !runtime.is_symlink(&link) {
        return;
    }
    warn!("Removing stale alias at {}", link.display());
    if let Err(e) = runtime.remove_symlink(&link) {
        warn!("Failed to remove stale alias at {}: {e:#}", link.display());
    }
}
