//! Shared-prefix layout coordination.
//!
//! Two independently installed packages (a database engine and an extension
//! built against it) must agree on one runtime-discoverable directory layout
//! without writing outside their own sandboxes. The build system is therefore
//! told two different stories:
//!
//! - at `configure` time, paths point at the *logical* shared location under
//!   the global prefix (`{prefix}/share/postgresql@16`, ...), which is what
//!   gets compiled into the binaries;
//! - at `install` time, the same roles are overridden to *physical* paths
//!   inside the keg (the sandbox root), which is the only place the build is
//!   allowed to write.
//!
//! The link step ([`link`]) later symlinks keg directories into the prefix so
//! that the logical paths actually resolve. [`LayoutSpec::link_destination`]
//! is the pure model of that step; the invariant is that the linked
//! destination of every install-phase path equals the configure-phase path
//! for the same role.

pub mod link;
mod role;

pub use link::link_keg;
pub use role::LayoutRole;

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Which story the build system is being told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Logical paths under the global prefix, baked into the binaries.
    Configure,
    /// Physical paths inside the keg, where files are actually written.
    Install,
}

/// Inputs of the layout computation for one package build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutSpec {
    /// The global prefix every package's logical paths hang off.
    pub prefix: PathBuf,
    /// The physical sandbox root this build may write to.
    pub sandbox: PathBuf,
    /// The version-qualified name the shared directories carry
    /// (`family@major`). For an extension this is the *engine's* qualified
    /// name, not its own: both packages must resolve the same shared tree.
    pub shared_name: String,
    /// Roles whose keg directory keeps the qualified name even at install
    /// time (package-private trees, e.g. `lib/postgresql@16`).
    private_roles: BTreeSet<LayoutRole>,
}

impl LayoutSpec {
    /// A spec with the default private role set (the library tree).
    pub fn new(
        prefix: impl Into<PathBuf>,
        sandbox: impl Into<PathBuf>,
        shared_name: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            sandbox: sandbox.into(),
            shared_name: shared_name.into(),
            private_roles: BTreeSet::from([LayoutRole::Lib]),
        }
    }

    /// Mark an additional role as package-private in the keg. Extensions mark
    /// `Data` so their SQL scripts land under `share/{engine}@{major}`.
    pub fn with_private_role(mut self, role: LayoutRole) -> Self {
        self.private_roles.insert(role);
        self
    }

    /// The path for `role` in the given phase.
    pub fn resolve(&self, role: LayoutRole, phase: Phase) -> PathBuf {
        match phase {
            Phase::Configure => self
                .prefix
                .join(role.dirname())
                .join(&self.shared_name),
            Phase::Install => {
                let base = self.sandbox.join(role.dirname());
                if self.private_roles.contains(&role) {
                    base.join(&self.shared_name)
                } else {
                    base
                }
            }
        }
    }

    /// Resolve by override variable name. Unknown names are not resolved.
    pub fn resolve_var(&self, var_name: &str, phase: Phase) -> Option<PathBuf> {
        LayoutRole::from_var_name(var_name).map(|role| self.resolve(role, phase))
    }

    /// The full role-to-path mapping for one phase.
    pub fn overrides(&self, phase: Phase) -> BTreeMap<LayoutRole, PathBuf> {
        LayoutRole::ALL
            .iter()
            .map(|&role| (role, self.resolve(role, phase)))
            .collect()
    }

    /// Where the link step exposes an install-phase path.
    ///
    /// Models the Installer's symlink stage: the keg's role directory is
    /// linked at `{prefix}/{dirname}/{shared_name}`, so a path inside it
    /// becomes observable at the configure-phase location plus the same
    /// suffix. Fails if `install_path` is not inside the role's keg
    /// directory.
    pub fn link_destination(&self, role: LayoutRole, install_path: &Path) -> Result<PathBuf> {
        let role_root = self.resolve(role, Phase::Install);
        let suffix = install_path.strip_prefix(&role_root).with_context(|| {
            format!(
                "{} is not under the keg's {} directory {}",
                install_path.display(),
                role,
                role_root.display()
            )
        })?;
        Ok(self.resolve(role, Phase::Configure).join(suffix))
    }
}
