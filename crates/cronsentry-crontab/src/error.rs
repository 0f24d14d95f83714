use thiserror::Error;

/// Reasons a schedule source could not be read.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{source_name} does not exist")]
    NotFound { source_name: String },

    #[error("permission denied reading {source_name}")]
    PermissionDenied { source_name: String },

    /// The source exists but holds no schedule text.
    #[error("{source_name} is empty")]
    Empty { source_name: String },

    #[error("cannot read {source_name}: {reason}")]
    Unreadable { source_name: String, reason: String },
}

impl ParseError {
    pub(crate) fn from_io(source_name: &str, err: std::io::Error) -> Self {
        let source_name = source_name.to_string();
        match err.kind() {
            std::io::ErrorKind::NotFound => ParseError::NotFound { source_name },
            std::io::ErrorKind::PermissionDenied => ParseError::PermissionDenied { source_name },
            _ => ParseError::Unreadable {
                source_name,
                reason: err.to_string(),
            },
        }
    }
}

/// Reasons rewritten schedule text could not be persisted.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{target} is not writable: {reason}")]
    NotWritable { target: String, reason: String },

    /// The external `crontab` installer rejected the text.
    #[error("crontab installer failed for {target}: {reason}")]
    InstallerFailed { target: String, reason: String },
}
