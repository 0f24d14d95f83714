use thiserror::Error;

#[derive(Debug, Error)]
pub enum PingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status})")]
    Api { status: u16 },

    /// Every host and retry failed.
    #[error("all {attempts} delivery attempts failed: {last}")]
    Exhausted { attempts: u32, last: String },
}

pub type Result<T> = std::result::Result<T, PingError>;
