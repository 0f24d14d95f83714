use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronsentryError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CronsentryError {
    /// Short error code string used in CLI diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            CronsentryError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CronsentryError>;
