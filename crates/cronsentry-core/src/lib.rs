//! `cronsentry-core` — configuration, shared constants and the top-level
//! error type used by every other cronsentry crate.

pub mod config;
pub mod error;

pub use config::CronsentryConfig;
pub use error::{CronsentryError, Result};
