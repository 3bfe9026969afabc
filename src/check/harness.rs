//! Live-cluster lifecycle for smoke tests.
//!
//! `pg_ctl start` blocks until the server is ready and `pg_ctl stop` blocks
//! until shutdown completes, so the harness only has to guarantee that stop
//! runs on every exit path.

use anyhow::Result;
use log::warn;
use std::path::{Path, PathBuf};

use crate::process::{CommandRunner, Invocation, run_checked};

/// A running database cluster that is stopped when the guard goes away.
///
/// The success path calls [`ClusterGuard::stop`] so shutdown errors are
/// reported; on assertion failure the drop impl stops the server
/// best-effort, so no process outlives the test run.
pub struct ClusterGuard<'a> {
    runner: &'a dyn CommandRunner,
    pg_ctl: PathBuf,
    data_dir: PathBuf,
    stopped: bool,
}

impl<'a> ClusterGuard<'a> {
    /// Initialize a cluster in `data_dir`.
    #[tracing::instrument(skip(runner, pg_ctl))]
    pub fn init(runner: &'a dyn CommandRunner, pg_ctl: &Path, data_dir: &Path) -> Result<()> {
        run_checked(
            runner,
            &Invocation::new(pg_ctl.display().to_string())
                .arg("initdb")
                .arg("-D")
                .arg(data_dir.display().to_string()),
        )?;
        Ok(())
    }

    /// Start the cluster, logging to `log_file`. Blocks until ready.
    #[tracing::instrument(skip(runner, pg_ctl))]
    pub fn start(
        runner: &'a dyn CommandRunner,
        pg_ctl: &Path,
        data_dir: &Path,
        log_file: &Path,
    ) -> Result<Self> {
        run_checked(
            runner,
            &Invocation::new(pg_ctl.display().to_string())
                .arg("start")
                .arg("-D")
                .arg(data_dir.display().to_string())
                .arg("-l")
                .arg(log_file.display().to_string()),
        )?;
        Ok(Self {
            runner,
            pg_ctl: pg_ctl.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
            stopped: false,
        })
    }

    fn stop_invocation(&self) -> Invocation {
        Invocation::new(self.pg_ctl.display().to_string())
            .arg("stop")
            .arg("-D")
            .arg(self.data_dir.display().to_string())
    }

    /// Stop the cluster, consuming the guard. Blocks until shutdown.
    pub fn stop(mut self) -> Result<()> {
        self.stopped = true;
        run_checked(self.runner, &self.stop_invocation())?;
        Ok(())
    }
}

impl Drop for ClusterGuard<'_> {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        if let Err(e) = run_checked(self.runner, &self.stop_invocation()) {
            warn!(
                "Failed to stop cluster in {}: {e:#}",
                self.data_dir.display()
            );
        }
    }
}
