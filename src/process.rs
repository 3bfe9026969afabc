//! External command execution behind a mockable seam.
//!
//! All build and test steps go through [`CommandRunner`], so recipes can be
//! exercised in tests without touching the host system. Environment changes
//! are carried on the [`Invocation`] itself rather than mutated globally, and
//! are therefore scoped to exactly one command.

use anyhow::{Context, Result, bail};
use log::debug;
use std::path::PathBuf;
use std::process::Command;

/// A single external command: program, arguments, working directory, and the
/// environment overrides that apply to this command only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub env_removals: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_removals.push(key.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// One-line rendering for logs and error messages.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    /// Convenience constructor for a successful run, used heavily by tests.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Convenience constructor for a failed run.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit is NOT an error at this level; callers that require
    /// success use [`run_checked`].
    fn run(&self, invocation: &Invocation) -> Result<RunOutput>;
}

/// Executes commands on the host system.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    #[tracing::instrument(skip(self))]
    fn run(&self, invocation: &Invocation) -> Result<RunOutput> {
        debug!("Running: {}", invocation.display());

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        for key in &invocation.env_removals {
            cmd.env_remove(key);
        }
        for (key, value) in &invocation.envs {
            cmd.env(key, value);
        }
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .with_context(|| format!("Failed to spawn `{}`", invocation.program))?;

        Ok(RunOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a command and fail on non-zero exit, surfacing the exit code and
/// stderr verbatim. There is no retry at this level; build failures propagate
/// directly to the caller.
pub fn run_checked(runner: &dyn CommandRunner, invocation: &Invocation) -> Result<RunOutput> {
    let output = runner.run(invocation)?;
    if !output.success {
        bail!(
            "`{}` failed with exit code {:?}: {}",
            invocation.display(),
            output.code,
            output.stderr.trim()
        );
    }
    Ok(output)
}

/// Run a command and return its trimmed stdout, failing on non-zero exit.
pub fn output_line(runner: &dyn CommandRunner, invocation: &Invocation) -> Result<String> {
    let output = run_checked(runner, invocation)?;
    Ok(output.stdout.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_invocation_builder() {
        let inv = Invocation::new("make")
            .arg("install")
            .args(["bindir=/tmp/bin", "mandir=/tmp/man"])
            .env("MAKEFLAGS", "-j1")
            .env_remove("PKG_CONFIG_LIBDIR")
            .current_dir("/build");

        assert_eq!(inv.program, "make");
        assert_eq!(inv.args, vec!["install", "bindir=/tmp/bin", "mandir=/tmp/man"]);
        assert_eq!(inv.envs, vec![("MAKEFLAGS".to_string(), "-j1".to_string())]);
        assert_eq!(inv.env_removals, vec!["PKG_CONFIG_LIBDIR"]);
        assert_eq!(inv.cwd, Some(PathBuf::from("/build")));
        assert_eq!(inv.display(), "make install bindir=/tmp/bin mandir=/tmp/man");
    }

    #[test]
    fn test_run_checked_propagates_failure() {
        let mut runner = MockCommandRunner::new();
        let inv = Invocation::new("make");
        runner
            .expect_run()
            .with(eq(inv.clone()))
            .returning(|_| Ok(RunOutput::failed(2, "ld: symbol not found")));

        let err = run_checked(&runner, &inv).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit code Some(2)"));
        assert!(msg.contains("ld: symbol not found"));
    }

    #[test]
    fn test_output_line_trims_stdout() {
        let mut runner = MockCommandRunner::new();
        let inv = Invocation::new("pg_config").arg("--sharedir");
        runner
            .expect_run()
            .with(eq(inv.clone()))
            .returning(|_| Ok(RunOutput::ok("/opt/kegs/share/postgresql@16\n")));

        assert_eq!(
            output_line(&runner, &inv).unwrap(),
            "/opt/kegs/share/postgresql@16"
        );
    }

    #[test]
    fn test_system_runner_captures_exit_code() {
        let runner = SystemRunner;
        let ok = runner.run(&Invocation::new("true")).unwrap();
        assert!(ok.success);

        let fail = runner.run(&Invocation::new("false")).unwrap();
        assert!(!fail.success);

        let missing = runner.run(&Invocation::new("definitely-not-a-real-program"));
        assert!(missing.is_err());
    }

    #[test]
    fn test_system_runner_scoped_env() {
        let runner = SystemRunner;
        let inv = Invocation::new("sh")
            .args(["-c", "printf %s \"$KEGRUN_SCOPED\""])
            .env("KEGRUN_SCOPED", "once");
        let out = runner.run(&inv).unwrap();
        assert_eq!(out.stdout, "once");

        // The override does not leak into this process.
        assert!(std::env::var("KEGRUN_SCOPED").is_err());
    }
}
