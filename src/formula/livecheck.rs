//! Upstream version discovery.
//!
//! Each formula names a listing page and a regular expression whose first
//! capture group is a candidate version. The newest match, by numeric
//! component comparison, is the latest upstream version.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Livecheck {
    pub url: String,
    /// Regex with the version in capture group 1.
    pub pattern: String,
}

impl Livecheck {
    pub fn new(url: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pattern: pattern.into(),
        }
    }

    /// The newest version mentioned in `body`, or `None` if nothing matches.
    pub fn latest(&self, body: &str) -> Result<Option<String>> {
        let regex = Regex::new(&self.pattern)
            .with_context(|| format!("Invalid livecheck pattern {:?}", self.pattern))?;

        Ok(regex
            .captures_iter(body)
            .filter_map(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
            .max_by(|a, b| compare_versions(a, b)))
    }
}

/// Compare dotted version strings component-wise, numerically.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.').map(|part| part.parse().unwrap_or(0)).collect()
    };
    parse(a).cmp(&parse(b))
}
