//! Shared data types for cronsentry-exec.

use serde::{Deserialize, Serialize};

/// Everything the CLI layer decides about one supervised run.
///
/// Flags bound on the command line are folded into this value rather than
/// read from global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Identifies the job in status reports and names the output buffer.
    pub monitor_key: String,

    /// `true` passes the full calling environment; `false` emulates cron's
    /// minimal environment.
    pub inherit_env: bool,

    /// Send run/complete/fail reports and upload the log.
    pub monitor: bool,

    /// Do not relay child output to our own stdout.
    pub no_stdout: bool,

    /// Host identity attached to reports.
    pub host: Option<String>,
}

impl RunOptions {
    pub fn new(monitor_key: impl Into<String>) -> Self {
        Self {
            monitor_key: monitor_key.into(),
            inherit_env: true,
            monitor: true,
            no_stdout: false,
            host: None,
        }
    }
}
