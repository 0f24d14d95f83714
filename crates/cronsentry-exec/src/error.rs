//! Error types for the cronsentry-exec crate.

use thiserror::Error;

/// Failures while preparing or supervising a child.
///
/// Only `NoShell` prevents a job from running; the rest are logged and the
/// supervisor degrades instead.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// None of the candidate shells could be found.
    #[error("no usable shell found (tried {tried})")]
    NoShell { tried: String },

    /// The private output buffer could not be created or written.
    #[error("output store error: {0}")]
    OutputStore(std::io::Error),

    /// The shell process could not be spawned.
    #[error("spawn failed: {0}")]
    Spawn(std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// The process-safety rule a PID violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("PID {pid} is not positive")]
    NotPositive { pid: i64 },

    #[error("PID {pid} exceeds the system maximum of {max}")]
    AboveMaximum { pid: i64, max: u32 },

    #[error("PID {pid} is reserved for a critical system process")]
    Reserved { pid: u32 },

    #[error("no process with PID {pid}")]
    NotFound { pid: u32 },

    #[error("PID {pid} is a kernel thread ({name})")]
    KernelThread { pid: u32, name: String },

    #[error("PID {pid} has no allowed ancestor within {depth} generations")]
    NoAllowedAncestor { pid: u32, depth: usize },
}

impl ValidationError {
    /// Stable identifier of the violated rule, for diagnostics.
    pub fn rule(&self) -> &'static str {
        match self {
            ValidationError::NotPositive { .. } => "pid-positive",
            ValidationError::AboveMaximum { .. } => "pid-max",
            ValidationError::Reserved { .. } => "pid-reserved",
            ValidationError::NotFound { .. } => "process-exists",
            ValidationError::KernelThread { .. } => "not-kernel-thread",
            ValidationError::NoAllowedAncestor { .. } => "allowed-ancestor",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn supervisor_errors_name_the_failing_step() {
        let store = SupervisorError::OutputStore(ErrorKind::PermissionDenied.into());
        assert!(store.to_string().starts_with("output store error:"));
        let spawn = SupervisorError::Spawn(ErrorKind::NotFound.into());
        assert!(spawn.to_string().starts_with("spawn failed:"));
        let shell = SupervisorError::NoShell {
            tried: "bash, sh".into(),
        };
        assert_eq!(shell.to_string(), "no usable shell found (tried bash, sh)");
    }

    #[test]
    fn every_rule_has_a_distinct_name() {
        let errors = [
            ValidationError::NotPositive { pid: 0 },
            ValidationError::AboveMaximum { pid: 9, max: 8 },
            ValidationError::Reserved { pid: 1 },
            ValidationError::NotFound { pid: 5 },
            ValidationError::KernelThread {
                pid: 2,
                name: "kthreadd".into(),
            },
            ValidationError::NoAllowedAncestor { pid: 7, depth: 10 },
        ];
        let mut rules: Vec<_> = errors.iter().map(ValidationError::rule).collect();
        rules.sort();
        rules.dedup();
        assert_eq!(rules.len(), errors.len());
    }
}
