//! Post-install smoke testing.
//!
//! Assertion helpers report the literal expected and actual values; the
//! first failure aborts the rest of that formula's checks.

pub mod harness;

pub use harness::ClusterGuard;

use anyhow::{Context, Result, bail};
use regex::Regex;
use std::net::TcpListener;

/// Assert that a command's output equals the expected string exactly.
pub fn assert_output_eq(what: &str, expected: &str, actual: &str) -> Result<()> {
    if expected != actual {
        bail!("{what} mismatch: expected {expected:?}, actual {actual:?}");
    }
    Ok(())
}

/// Assert that `actual` contains `needle`.
pub fn assert_contains(what: &str, needle: &str, actual: &str) -> Result<()> {
    if !actual.contains(needle) {
        bail!("{what} mismatch: expected to contain {needle:?}, actual {actual:?}");
    }
    Ok(())
}

/// Assert that `actual` matches the regular expression `pattern`.
pub fn assert_matches(what: &str, pattern: &str, actual: &str) -> Result<()> {
    let regex = Regex::new(pattern).with_context(|| format!("Invalid pattern {pattern:?}"))?;
    if !regex.is_match(actual) {
        bail!("{what} mismatch: expected to match {pattern:?}, actual {actual:?}");
    }
    Ok(())
}

/// An ephemeral free TCP port, so a test cluster never collides with an
/// already-running instance.
pub fn free_port() -> Result<u16> {
    let listener =
        TcpListener::bind(("127.0.0.1", 0)).context("Failed to bind an ephemeral port")?;
    let port = listener
        .local_addr()
        .context("Failed to read the bound address")?
        .port();
    Ok(port)
}
