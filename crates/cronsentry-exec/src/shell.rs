//! Shell selection and the child's environment.

use std::path::PathBuf;

use cronsentry_core::config::MARKER_ENV;
use tokio::process::Command;

use crate::error::{Result, SupervisorError};

/// Minimal environment cron gives its jobs.
pub const CRON_SHELL: &str = "/bin/sh";
pub const CRON_PATH: &str = "/usr/bin:/bin";

#[cfg(not(windows))]
const CANDIDATES: &[(&str, &str)] = &[("bash", "-c"), ("sh", "-c")];

#[cfg(windows)]
const CANDIDATES: &[(&str, &str)] = &[("bash", "-c"), ("sh", "-c"), ("powershell", "-Command")];

/// A shell program and the flag that makes it run a command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    pub program: PathBuf,
    pub flag: String,
}

impl Shell {
    pub fn new(program: impl Into<PathBuf>, flag: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            flag: flag.into(),
        }
    }

    /// Pick the most capable shell on `PATH`.
    pub fn resolve() -> Result<Self> {
        for (name, flag) in CANDIDATES {
            if let Ok(program) = which::which(name) {
                return Ok(Self::new(program, *flag));
            }
        }
        Err(SupervisorError::NoShell {
            tried: CANDIDATES
                .iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// A command that runs `script` with this shell in the given environment.
    pub fn command(&self, script: &str, inherit_env: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.flag).arg(script);
        if !inherit_env {
            cmd.env_clear();
        }
        for (key, value) in child_environment(inherit_env) {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Variables set on top of (or instead of) the inherited environment.
///
/// The marker is always present so nested invocations can tell they are
/// already supervised.
pub fn child_environment(inherit_env: bool) -> Vec<(String, String)> {
    let mut vars = Vec::new();
    if !inherit_env {
        vars.push(("SHELL".to_string(), CRON_SHELL.to_string()));
        vars.push(("PATH".to_string(), CRON_PATH.to_string()));
        if let Ok(home) = std::env::var("HOME") {
            vars.push(("HOME".to_string(), home));
        }
    }
    vars.push((MARKER_ENV.to_string(), "1".to_string()));
    vars
}
