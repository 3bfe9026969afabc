//! The formula catalog: every recipe this tool knows how to build.

mod postgis;
mod postgresql;

pub use postgis::PostgisAt16;
pub use postgresql::PostgresqlAt16;

use anyhow::{Result, bail};

use crate::formula::Formula;

pub fn all() -> Vec<Box<dyn Formula>> {
    vec![Box::new(PostgresqlAt16), Box::new(PostgisAt16)]
}

/// Look a formula up by its `family@major` name.
pub fn find(name: &str) -> Result<Box<dyn Formula>> {
    for formula in all() {
        if formula.metadata().name.to_string() == name {
            return Ok(formula);
        }
    }
    let known: Vec<String> = all()
        .iter()
        .map(|formula| formula.metadata().name.to_string())
        .collect();
    bail!("Unknown formula {name:?} (known: {})", known.join(", "))
}
