//! Run-as identity probing for system-level crontabs.

use std::process::{Command, Stdio};

use tracing::debug;

/// Answers whether a word names a system user.
pub trait UserLookup {
    fn is_user(&self, name: &str) -> bool;
}

/// Resolves users with `id -u`, the same way cron itself decides whether the
/// sixth field of a system crontab line is a user.
///
/// Any failure to run the probe is treated as "not a user".
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUserLookup;

impl UserLookup for SystemUserLookup {
    fn is_user(&self, name: &str) -> bool {
        if !plausible_user_name(name) {
            return false;
        }
        let output = match Command::new("id")
            .args(["-u", name])
            .stdin(Stdio::null())
            .output()
        {
            Ok(out) => out,
            Err(e) => {
                debug!(name, error = %e, "id probe failed to run");
                return false;
            }
        };
        output.status.success()
            && String::from_utf8_lossy(&output.stdout)
                .trim()
                .parse::<u32>()
                .is_ok()
    }
}

/// Cheap filter so paths, options and shell syntax never reach `id`.
fn plausible_user_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '$'))
}
