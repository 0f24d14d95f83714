//! cronsentry-exec — monitored execution of scheduled jobs.
//!
//! Provides:
//! - [`Supervisor`]: runs one shell command the way cron would, tees its
//!   output, relays termination signals and reports the outcome
//! - [`OutputStore`]: private on-disk buffer of a child's output with tail reads
//! - [`ownership::OwnershipValidator`]: guards any action taken on a running PID
//!
//! # Quick start
//!
//! ```rust,no_run
//! use cronsentry_exec::{RunOptions, Supervisor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let supervisor = Supervisor::new(None);
//!     let code = supervisor
//!         .run("echo hello && false", &RunOptions::new("abc123"))
//!         .await
//!         .unwrap();
//!     std::process::exit(code);
//! }
//! ```

pub mod error;
pub mod output;
pub mod ownership;
pub mod platform;
pub mod shell;
pub mod supervisor;
pub mod types;

pub use error::{Result, SupervisorError, ValidationError};
pub use output::OutputStore;
pub use platform::{ProcessControl, ProcessSignal};
pub use supervisor::Supervisor;
pub use types::RunOptions;
