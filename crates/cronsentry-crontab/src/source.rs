//! Source resolution and persistence: where schedule text comes from and
//! where rewritten text goes.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::error::{ParseError, WriteError};

/// System-wide crontab.
pub const SYSTEM_CRONTAB: &str = "/etc/crontab";
/// Drop-in directory read by the system cron daemon.
pub const DROP_IN_DIR: &str = "/etc/cron.d";

/// Mode for rewritten crontab files; cron refuses group/other-writable files.
#[cfg(unix)]
const CRONTAB_FILE_MODE: u32 = 0o644;

/// Read a user's crontab through the external installer command.
pub(crate) fn read_user_crontab(user: Option<&str>) -> Result<String, ParseError> {
    let name = user_source_name(user);
    let mut cmd = Command::new("crontab");
    if let Some(user) = user {
        cmd.args(["-u", user]);
    }
    let output = cmd
        .arg("-l")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| ParseError::Unreadable {
            source_name: name.clone(),
            reason: format!("cannot run crontab: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let lower = stderr.to_lowercase();
        return Err(if lower.contains("no crontab for") {
            ParseError::Empty { source_name: name }
        } else if lower.contains("not allowed") || lower.contains("permission denied") {
            ParseError::PermissionDenied { source_name: name }
        } else {
            ParseError::Unreadable {
                source_name: name,
                reason: stderr,
            }
        });
    }

    non_empty(&name, String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Read a crontab file.
pub(crate) fn read_file(path: &Path) -> Result<String, ParseError> {
    let name = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|e| ParseError::from_io(&name, e))?;
    non_empty(&name, text)
}

fn non_empty(name: &str, text: String) -> Result<String, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty {
            source_name: name.to_string(),
        });
    }
    Ok(text)
}

/// List the crontab files of a drop-in directory, sorted by name.
///
/// Hidden files and package-manager or editor leftovers are skipped, as the
/// cron daemon skips them.
pub fn drop_in_files(dir: &Path) -> Result<Vec<PathBuf>, ParseError> {
    let name = dir.display().to_string();
    let entries = std::fs::read_dir(dir).map_err(|e| ParseError::from_io(&name, e))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_crontab_file_name)
        })
        .collect();
    files.sort();
    debug!(dir = %name, count = files.len(), "listed drop-in crontabs");
    Ok(files)
}

fn is_crontab_file_name(name: &str) -> bool {
    !name.starts_with('.')
        && !name.ends_with('~')
        && !name.contains(".dpkg-")
        && !name.ends_with(".rpmsave")
        && !name.ends_with(".rpmnew")
        && !name.ends_with(".swp")
}

/// Install `text` as a user's crontab via `crontab [-u user] -`.
pub(crate) fn install_user_crontab(user: Option<&str>, text: &str) -> Result<(), WriteError> {
    let target = user_source_name(user);
    let installer_err = |reason: String| WriteError::InstallerFailed {
        target: target.clone(),
        reason,
    };

    let mut cmd = Command::new("crontab");
    if let Some(user) = user {
        cmd.args(["-u", user]);
    }
    let mut child = cmd
        .arg("-")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| installer_err(format!("cannot run crontab: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(with_trailing_newline(text).as_bytes())
            .map_err(|e| installer_err(e.to_string()))?;
    }
    let output = child
        .wait_with_output()
        .map_err(|e| installer_err(e.to_string()))?;

    if !output.status.success() {
        return Err(installer_err(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    info!(crontab = %target, "crontab installed");
    Ok(())
}

/// Overwrite a crontab file and reset its permissions.
pub(crate) fn write_file(path: &Path, text: &str) -> Result<(), WriteError> {
    let target = path.display().to_string();
    let not_writable = |e: std::io::Error| WriteError::NotWritable {
        target: target.clone(),
        reason: e.to_string(),
    };

    std::fs::write(path, with_trailing_newline(text)).map_err(not_writable)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).map_err(not_writable)?.permissions();
        perms.set_mode(CRONTAB_FILE_MODE);
        std::fs::set_permissions(path, perms).map_err(not_writable)?;
    }

    info!(crontab = %target, "crontab file written");
    Ok(())
}

pub(crate) fn user_source_name(user: Option<&str>) -> String {
    match user {
        Some(user) => format!("crontab for {user}"),
        None => "user crontab".to_string(),
    }
}

/// cron ignores a final line that lacks a newline.
fn with_trailing_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}
