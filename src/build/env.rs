//! Scoped build environment.
//!
//! Recipes never mutate the process environment. Flags like `LDFLAGS`
//! prepends or a `PKG_CONFIG_LIBDIR` removal are collected here and applied
//! to each [`Invocation`](crate::process::Invocation), so they end when the
//! command ends.

use crate::process::Invocation;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnv {
    sets: Vec<(String, String)>,
    removals: Vec<String>,
    deparallelized: bool,
}

impl BuildEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable for every build command.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.sets.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            self.sets.push((key, value));
        }
    }

    /// Prepend a value to a variable, separated by a space. Only values set
    /// through this `BuildEnv` are composed; the process environment is never
    /// consulted.
    pub fn prepend(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.sets.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = format!("{} {}", value, existing.1);
        } else {
            self.sets.push((key, value));
        }
    }

    /// Remove a variable from every build command's environment.
    pub fn remove(&mut self, key: impl Into<String>) {
        self.removals.push(key.into());
    }

    /// Force single-job make. Required for build systems that are not safe
    /// under concurrent job execution.
    pub fn deparallelize(&mut self) {
        self.deparallelized = true;
    }

    pub fn is_deparallelized(&self) -> bool {
        self.deparallelized
    }

    /// Apply the collected overrides to one invocation.
    pub fn apply(&self, mut invocation: Invocation) -> Invocation {
        for key in &self.removals {
            invocation = invocation.env_remove(key.clone());
        }
        for (key, value) in &self.sets {
            invocation = invocation.env(key.clone(), value.clone());
        }
        invocation
    }
}
