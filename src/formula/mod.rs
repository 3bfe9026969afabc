//! Formula model: metadata, dependencies, and the recipe trait.

mod dependency;
mod livecheck;
mod service;

pub use dependency::{DepRole, Dependency, Os, for_current_os};
pub use livecheck::Livecheck;
pub use service::ServiceSpec;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::fetch::Sha256Digest;
use crate::layout::LayoutSpec;
use crate::process::CommandRunner;
use crate::runtime::Runtime;

/// A versioned formula name: `family@major` (e.g. `postgresql@16`).
///
/// The major qualifier is what lets several builds of one family coexist; it
/// appears in the shared directory layout and in artifact suffixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormulaName {
    family: String,
    major: u32,
}

impl FormulaName {
    pub fn new(family: impl Into<String>, major: u32) -> Self {
        Self {
            family: family.into(),
            major,
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn major(&self) -> u32 {
        self.major
    }
}

impl FromStr for FormulaName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (family, major) = s
            .split_once('@')
            .with_context(|| format!("Invalid formula name {s:?}: expected family@major"))?;
        if family.is_empty() {
            bail!("Invalid formula name {s:?}: empty family");
        }
        let major = major
            .parse()
            .with_context(|| format!("Invalid formula name {s:?}: bad major version"))?;
        Ok(Self::new(family, major))
    }
}

impl fmt::Display for FormulaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.family, self.major)
    }
}

impl Serialize for FormulaName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The declarative surface of a formula.
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub name: FormulaName,
    pub desc: String,
    pub homepage: String,
    pub url: String,
    pub sha256: Sha256Digest,
    pub license: String,
    pub version: String,
    /// Bumped when the recipe changes without an upstream version change.
    pub revision: u32,
    pub livecheck: Livecheck,
}

impl Metadata {
    /// The keg directory name for this build: the upstream version, plus the
    /// revision when one is set (`3.4.2_2`).
    pub fn version_dir(&self) -> String {
        if self.revision > 0 {
            format!("{}_{}", self.version, self.revision)
        } else {
            self.version.clone()
        }
    }
}

/// Everything an install phase may touch. Paths are precomputed by the
/// caller; recipes derive everything else from these.
pub struct InstallContext<'a> {
    pub runtime: &'a dyn Runtime,
    pub runner: &'a dyn CommandRunner,
    /// Global prefix shared by all packages.
    pub prefix: PathBuf,
    /// This build's physical sandbox root.
    pub keg: PathBuf,
    /// The unpacked source tree the build commands run in.
    pub build_dir: PathBuf,
}

impl InstallContext<'_> {
    /// The stable opt-path of another installed package.
    pub fn opt_prefix(&self, name: &str) -> PathBuf {
        self.prefix.join("opt").join(name)
    }

    pub fn opt_bin(&self, name: &str) -> PathBuf {
        self.opt_prefix(name).join("bin")
    }

    pub fn opt_lib(&self, name: &str) -> PathBuf {
        self.opt_prefix(name).join("lib")
    }

    pub fn opt_include(&self, name: &str) -> PathBuf {
        self.opt_prefix(name).join("include")
    }

    pub fn keg_bin(&self) -> PathBuf {
        self.keg.join("bin")
    }

    pub fn keg_man1(&self) -> PathBuf {
        self.keg.join("share/man/man1")
    }

    pub fn keg_doc(&self, name: &FormulaName) -> PathBuf {
        self.keg.join("share/doc").join(name.to_string())
    }

    /// Shared configuration directory under the prefix.
    pub fn etc(&self) -> PathBuf {
        self.prefix.join("etc")
    }

    /// Shared state directory under the prefix (clusters, logs).
    pub fn var(&self) -> PathBuf {
        self.prefix.join("var")
    }
}

/// Everything a post-install smoke test may touch. `work_dir` is ephemeral
/// and private to this run.
pub struct CheckContext<'a> {
    pub runtime: &'a dyn Runtime,
    pub runner: &'a dyn CommandRunner,
    pub prefix: PathBuf,
    pub keg: PathBuf,
    pub work_dir: PathBuf,
}

impl CheckContext<'_> {
    pub fn opt_bin(&self, name: &str) -> PathBuf {
        self.prefix.join("opt").join(name).join("bin")
    }

    pub fn opt_include(&self, name: &str) -> PathBuf {
        self.prefix.join("opt").join(name).join("include")
    }
}

/// A build/install/test recipe for one upstream package.
pub trait Formula: Send + Sync + std::fmt::Debug {
    fn metadata(&self) -> Metadata;

    fn dependencies(&self) -> Vec<Dependency>;

    /// The directory layout this build resolves against. Extensions override
    /// this to share the engine's qualified trees.
    fn layout(&self, prefix: &Path, keg: &Path) -> LayoutSpec {
        LayoutSpec::new(prefix, keg, self.metadata().name.to_string())
    }

    /// Fetch-to-keg build sequence. Runs after sources are staged in
    /// `ctx.build_dir`; writes only under `ctx.keg`.
    fn install(&self, ctx: &InstallContext<'_>) -> Result<()>;

    /// Runs once after the keg is linked into the prefix.
    fn post_install(&self, _ctx: &InstallContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Descriptor for the host's service supervisor, if this package runs as
    /// a service.
    fn service(&self, _prefix: &Path) -> Option<ServiceSpec> {
        None
    }

    /// Post-install smoke test. The first failed assertion aborts the rest
    /// of this formula's checks.
    fn check(&self, ctx: &CheckContext<'_>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_name_parse_and_display() {
        let name: FormulaName = "postgresql@16".parse().unwrap();
        assert_eq!(name.family(), "postgresql");
        assert_eq!(name.major(), 16);
        assert_eq!(name.to_string(), "postgresql@16");
    }

    #[test]
    fn test_formula_name_rejects_malformed_input() {
        assert!("postgresql".parse::<FormulaName>().is_err());
        assert!("@16".parse::<FormulaName>().is_err());
        assert!("postgresql@sixteen".parse::<FormulaName>().is_err());
    }

    #[test]
    fn test_version_dir_includes_revision() {
        let mut metadata = Metadata {
            name: FormulaName::new("postgis", 16),
            desc: String::new(),
            homepage: String::new(),
            url: String::new(),
            sha256: Sha256Digest::try_from("a".repeat(64)).unwrap(),
            license: String::new(),
            version: "3.4.2".to_string(),
            revision: 2,
            livecheck: Livecheck::new("", ""),
        };
        assert_eq!(metadata.version_dir(), "3.4.2_2");

        metadata.revision = 0;
        assert_eq!(metadata.version_dir(), "3.4.2");
    }
}
