//! Shared data types for cronsentry-crontab.

use serde::{Deserialize, Serialize};

use crate::key::MonitorKey;

/// Hosts whose presence in a command means the job already reports directly.
const LEGACY_PING_HOSTS: &[&str] = &["cronitor.link", "cronitor.io", "cronsentry.link"];

/// Scripts run by the system's own periodic crontab entries.
const META_JOB_MARKERS: &[&str] = &[
    "run-parts",
    "cron.hourly",
    "cron.daily",
    "cron.weekly",
    "cron.monthly",
];

// ---------------------------------------------------------------------------
// LineKind
// ---------------------------------------------------------------------------

/// How a raw crontab line was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Blank,
    Comment,
    /// `NAME=value` assignment.
    Env,
    /// Shorthand event that is not periodic (`@reboot`).
    Skipped,
    /// Too few timing fields to be a job.
    Unparsed,
    Job,
}

// ---------------------------------------------------------------------------
// CronLine
// ---------------------------------------------------------------------------

/// One line of a crontab.
///
/// `raw` always holds the untrimmed original text so any line that is not
/// rewritten reproduces byte-for-byte. Only `Job` lines carry an expression
/// and command.
#[derive(Debug, Clone, Serialize)]
pub struct CronLine {
    pub raw: String,
    /// Zero-based position in the source.
    pub number: usize,
    pub kind: LineKind,
    pub expression: Option<String>,
    /// The underlying job, with any existing monitoring wrapper stripped.
    pub command: Option<String>,
    /// Key found in an existing wrapper.
    pub key: Option<MonitorKey>,
    /// Run-as user (system-level sources only).
    pub run_as: Option<String>,
    /// Flagged by a preceding ignore directive.
    pub ignored: bool,
    pub is_discovery: bool,
}

impl CronLine {
    pub fn inert(raw: impl Into<String>, number: usize, kind: LineKind) -> Self {
        Self {
            raw: raw.into(),
            number,
            kind,
            expression: None,
            command: None,
            key: None,
            run_as: None,
            ignored: false,
            is_discovery: false,
        }
    }

    pub fn is_job(&self) -> bool {
        self.kind == LineKind::Job
    }

    /// Already routed through the monitoring executable.
    pub fn is_wrapped(&self) -> bool {
        self.key.is_some()
    }

    pub fn is_meta_job(&self) -> bool {
        self.command
            .as_deref()
            .is_some_and(|cmd| META_JOB_MARKERS.iter().any(|m| cmd.contains(m)))
    }

    /// The job pings a monitoring endpoint on its own.
    pub fn has_legacy_integration(&self) -> bool {
        self.command.as_deref().is_some_and(|cmd| {
            let lower = cmd.to_lowercase();
            LEGACY_PING_HOSTS.iter().any(|h| lower.contains(h))
                || ((lower.contains("curl ") || lower.contains("wget "))
                    && (lower.contains("/ping/") || lower.contains("/p/")))
        })
    }

    /// Whether the line may be wrapped at all (independent of an existing key).
    pub fn is_monitorable(&self) -> bool {
        self.is_job()
            && self.expression.as_deref().is_some_and(|e| !e.is_empty())
            && self.command.as_deref().is_some_and(|c| !c.is_empty())
            && !self.ignored
            && !self.is_meta_job()
            && !self.has_legacy_integration()
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// How the running discovery command was invoked.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryInvocation {
    /// Full argv of the current process; argv[0] should be an absolute path.
    pub argv: Vec<String>,
    /// The source path exactly as it was typed, if one was given.
    pub source_arg: Option<String>,
}

/// Settings consulted while parsing one source.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub exec_name: String,
    /// Drop the discovery line instead of keeping or creating one.
    pub suppress_discovery: bool,
    /// When set and no discovery line exists, one is synthesized from it.
    pub discovery: Option<DiscoveryInvocation>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            exec_name: cronsentry_core::config::EXEC_NAME.to_string(),
            suppress_discovery: false,
            discovery: None,
        }
    }
}

/// Settings consulted while rewriting.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub exec_name: String,
    /// Emit `--no-stdout` in each wrapper.
    pub no_stdout: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            exec_name: cronsentry_core::config::EXEC_NAME.to_string(),
            no_stdout: false,
        }
    }
}
