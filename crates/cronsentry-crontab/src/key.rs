//! Monitor key derivation.
//!
//! A key correlates one crontab line with one tracked job. It must be
//! stable across repeated parses of an unchanged line and change whenever
//! the command, timing expression or run-as identity changes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::CronLine;

/// Hex characters kept from the digest.
const KEY_LEN: usize = 12;

/// Opaque identifier for a monitored job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorKey(pub String);

impl MonitorKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MonitorKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MonitorKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Derives keys for lines executed on one host.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    host: String,
}

impl KeyDeriver {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Use `host_override` if given, else the machine's hostname.
    pub fn for_host(host_override: Option<&str>) -> Self {
        Self::new(
            host_override
                .map(str::to_string)
                .unwrap_or_else(system_hostname),
        )
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Key for an ordinary job.
    pub fn job_key(&self, command: &str, expression: &str, run_as: Option<&str>) -> MonitorKey {
        let command = normalize(command);
        let expression = normalize(expression);
        digest(&[&self.host, &command, &expression, run_as.unwrap_or("")])
    }

    /// Key for a discovery line, which depends on the source alone so a
    /// renamed executable or changed flags never registers a second job.
    pub fn discovery_key(&self, source_identity: &str) -> MonitorKey {
        digest(&["discover", source_identity])
    }

    /// Key for `line`, or `None` if it is not a job. An existing key wins.
    pub fn line_key(&self, line: &CronLine, source_identity: &str) -> Option<MonitorKey> {
        if let Some(existing) = &line.key {
            return Some(existing.clone());
        }
        if line.is_discovery {
            return Some(self.discovery_key(source_identity));
        }
        let expression = line.expression.as_deref()?;
        let command = line.command.as_deref()?;
        Some(self.job_key(command, expression, line.run_as.as_deref()))
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn digest(parts: &[&str]) -> MonitorKey {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(KEY_LEN);
    MonitorKey(hex)
}

#[cfg(unix)]
fn system_hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes and gethostname writes at most that many.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(not(unix))]
fn system_hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}
