//! `cronsentry-ping` — fire-and-forget status reporting.
//!
//! The supervisor only depends on the [`Pinger`] trait; [`HttpPinger`] is the
//! production transport and tests substitute in-memory recorders.

pub mod error;
pub mod http;
pub mod types;

pub use error::{PingError, Result};
pub use http::HttpPinger;
pub use types::{Ping, PingState};

use async_trait::async_trait;

/// Destination for status events and log uploads.
///
/// Failures are reported to the caller, which logs them; they never change a
/// job's exit status.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn send(&self, ping: &Ping) -> Result<()>;

    /// Upload the full output of one run.
    async fn upload_log(&self, monitor_key: &str, series: &str, log: String) -> Result<()>;
}
