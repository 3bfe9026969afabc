//! Directory roles recognized by upstream `configure`/`make` scripts.

use serde::Serialize;
use std::fmt;

/// A layout role is one of the directory categories an autotools-style build
/// system lets the caller override (`bindir`, `datadir`, ...).
///
/// Roles outside this set are never resolved; the build system's own default
/// applies to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutRole {
    Bin,
    Data,
    Lib,
    Include,
    Man,
    Doc,
    Sysconf,
}

impl LayoutRole {
    pub const ALL: [LayoutRole; 7] = [
        LayoutRole::Bin,
        LayoutRole::Data,
        LayoutRole::Lib,
        LayoutRole::Include,
        LayoutRole::Man,
        LayoutRole::Doc,
        LayoutRole::Sysconf,
    ];

    /// The directory name this role occupies under an install root.
    pub fn dirname(self) -> &'static str {
        match self {
            LayoutRole::Bin => "bin",
            LayoutRole::Data => "share",
            LayoutRole::Lib => "lib",
            LayoutRole::Include => "include",
            LayoutRole::Man => "share/man",
            LayoutRole::Doc => "share/doc",
            LayoutRole::Sysconf => "etc",
        }
    }

    /// The override variable name the build system recognizes for this role.
    pub fn var_name(self) -> &'static str {
        match self {
            LayoutRole::Bin => "bindir",
            LayoutRole::Data => "datadir",
            LayoutRole::Lib => "libdir",
            LayoutRole::Include => "includedir",
            LayoutRole::Man => "mandir",
            LayoutRole::Doc => "docdir",
            LayoutRole::Sysconf => "sysconfdir",
        }
    }

    /// Look a role up by its override variable name. Unknown names yield
    /// `None`: the resolver must not invent paths for roles it does not
    /// recognize.
    pub fn from_var_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.var_name() == name)
    }
}

impl fmt::Display for LayoutRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.var_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_name_round_trip() {
        for role in LayoutRole::ALL {
            assert_eq!(LayoutRole::from_var_name(role.var_name()), Some(role));
        }
    }

    #[test]
    fn test_unknown_var_name_is_not_resolved() {
        assert_eq!(LayoutRole::from_var_name("localedir"), None);
        assert_eq!(LayoutRole::from_var_name(""), None);
    }
}
