//! Dependency declarations.

use serde::Serialize;

/// Whether a dependency is needed only to build, or also at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DepRole {
    Build,
    Runtime,
}

/// OS restriction for a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Any,
    Linux,
    Mac,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub name: String,
    pub role: DepRole,
    pub os: Os,
}

impl Dependency {
    /// A build-only dependency.
    pub fn build(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: DepRole::Build,
            os: Os::Any,
        }
    }

    /// A build-and-run dependency.
    pub fn runtime(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: DepRole::Runtime,
            os: Os::Any,
        }
    }

    pub fn linux_only(mut self) -> Self {
        self.os = Os::Linux;
        self
    }

    pub fn mac_only(mut self) -> Self {
        self.os = Os::Mac;
        self
    }
}

/// The subset of `deps` that applies to the OS this binary was built for.
pub fn for_current_os(deps: &[Dependency]) -> Vec<&Dependency> {
    deps.iter()
        .filter(|d| match d.os {
            Os::Any => true,
            Os::Linux => cfg!(target_os = "linux"),
            Os::Mac => cfg!(target_os = "macos"),
        })
        .collect()
}
