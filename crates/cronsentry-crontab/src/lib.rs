//! `cronsentry-crontab` — lossless crontab parsing and idempotent rewriting.
//!
//! # Overview
//!
//! A [`Crontab`] is loaded from one origin (a user's crontab, a system file,
//! or one file of a drop-in directory), parsed exactly once into an ordered
//! list of [`CronLine`] records, and then either inspected or re-serialized
//! with [`Crontab::write`]. Lines that are not rewritten reproduce
//! byte-for-byte.
//!
//! | Kind        | Wrapped on write? |
//! |-------------|-------------------|
//! | `Blank`     | never             |
//! | `Comment`   | never             |
//! | `Env`       | never             |
//! | `Skipped`   | never (`@reboot`) |
//! | `Unparsed`  | never             |
//! | `Job`       | when eligible and not already wrapped |

pub mod crontab;
pub mod discover;
pub mod error;
pub mod key;
pub mod parse;
pub mod source;
pub mod types;
pub mod users;

pub use crontab::Crontab;
pub use error::{ParseError, WriteError};
pub use key::{KeyDeriver, MonitorKey};
pub use types::{CronLine, DiscoveryInvocation, LineKind, ParseOptions, WriteOptions};
pub use users::{SystemUserLookup, UserLookup};
