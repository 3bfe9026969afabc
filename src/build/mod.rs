//! Build step orchestration.
//!
//! A recipe's install phase is a fixed sequence of external commands
//! (`./configure`, `make`, `make install` with override variables). Steps run
//! strictly one after another, and every failure propagates verbatim; there
//! is no retry.

pub mod alias;
pub mod disambiguate;
mod env;

pub use alias::BinaryAlias;
pub use env::BuildEnv;

use anyhow::Result;
use log::info;
use std::path::{Path, PathBuf};

use crate::process::{CommandRunner, Invocation, run_checked};

/// The configure arguments every recipe passes: install into the keg, keep
/// build output plain.
pub fn std_configure_args(keg: &Path) -> Vec<String> {
    vec![
        format!("--prefix={}", keg.display()),
        "--disable-debug".to_string(),
        "--disable-dependency-tracking".to_string(),
        "--disable-silent-rules".to_string(),
    ]
}

/// Runs the build command sequence for one recipe inside its source
/// directory, with one scoped [`BuildEnv`] shared by all steps.
pub struct BuildSteps<'a> {
    runner: &'a dyn CommandRunner,
    source_dir: PathBuf,
    env: BuildEnv,
}

impl<'a> BuildSteps<'a> {
    pub fn new(runner: &'a dyn CommandRunner, source_dir: impl Into<PathBuf>, env: BuildEnv) -> Self {
        Self {
            runner,
            source_dir: source_dir.into(),
            env,
        }
    }

    fn invocation(&self, program: &str) -> Invocation {
        self.env
            .apply(Invocation::new(program).current_dir(self.source_dir.clone()))
    }

    #[tracing::instrument(skip(self, args))]
    pub fn configure(&self, args: &[String]) -> Result<()> {
        info!("Configuring in {}", self.source_dir.display());
        run_checked(
            self.runner,
            &self.invocation("./configure").args(args.iter().cloned()),
        )?;
        Ok(())
    }

    /// Run `make` with the given targets/override variables.
    #[tracing::instrument(skip(self, args))]
    pub fn make(&self, args: &[String]) -> Result<()> {
        let mut invocation = self.invocation("make");
        if self.env.is_deparallelized() {
            invocation = invocation.arg("-j1");
        }
        run_checked(self.runner, &invocation.args(args.iter().cloned()))?;
        Ok(())
    }

    /// Run `make <install-target>` with install-phase override variables.
    #[tracing::instrument(skip(self, overrides))]
    pub fn make_install(&self, target: &str, overrides: &[String]) -> Result<()> {
        info!("Installing ({target})");
        let mut invocation = self.invocation("make").arg(target);
        if self.env.is_deparallelized() {
            invocation = invocation.arg("-j1");
        }
        run_checked(self.runner, &invocation.args(overrides.iter().cloned()))?;
        Ok(())
    }
}
