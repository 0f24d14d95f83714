//! Private on-disk buffer for a child's combined output.
//!
//! The buffer lives under `<system temp>/cronsentry/`, is readable by the
//! owner only, and is deleted when the store is dropped. Reads always look
//! at the file's size at call time, so a tail can be taken while output is
//! still arriving.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use cronsentry_core::config::TEMP_SUBDIR;
use tempfile::NamedTempFile;
use tracing::debug;

pub struct OutputStore {
    file: NamedTempFile,
}

impl OutputStore {
    /// Directory used when no override is configured.
    pub fn default_dir() -> PathBuf {
        std::env::temp_dir().join(TEMP_SUBDIR)
    }

    /// Create a fresh buffer in `dir`, named after `monitor_key`.
    pub fn create(dir: &Path, monitor_key: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let file = tempfile::Builder::new()
            .prefix(&format!("{}-", file_safe(monitor_key)))
            .suffix(".log")
            .tempfile_in(dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600))?;
        }

        debug!(path = %file.path().display(), "output buffer created");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// An async handle that appends to the buffer.
    pub fn writer(&self) -> io::Result<tokio::fs::File> {
        let handle = self.file.as_file().try_clone()?;
        Ok(tokio::fs::File::from_std(handle))
    }

    /// Current size of the buffer in bytes.
    pub fn len(&self) -> io::Result<u64> {
        Ok(fs::metadata(self.path())?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The last `max_bytes` bytes of the buffer, or all of it when shorter.
    pub fn gather(&self, max_bytes: u64) -> io::Result<Vec<u8>> {
        let mut reader = File::open(self.path())?;
        let size = reader.metadata()?.len();
        let start = size.saturating_sub(max_bytes);
        reader.seek(SeekFrom::Start(start))?;

        let mut tail = Vec::with_capacity((size - start) as usize);
        reader.take(size - start).read_to_end(&mut tail)?;
        Ok(tail)
    }

    /// [`gather`](Self::gather) decoded lossily as UTF-8.
    pub fn gather_text(&self, max_bytes: u64) -> io::Result<String> {
        let tail = self.gather(max_bytes)?;
        Ok(String::from_utf8_lossy(&tail).into_owned())
    }

    /// Delete the buffer now, surfacing any error instead of ignoring it on drop.
    pub fn close(self) -> io::Result<()> {
        self.file.close()
    }
}

/// Keys are hex digests in practice, but a user-supplied key must not
/// escape the buffer directory.
fn file_safe(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store_with(bytes: &[u8]) -> (tempfile::TempDir, OutputStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::create(dir.path(), "abc123").unwrap();
        let mut handle = store.file.as_file().try_clone().unwrap();
        handle.write_all(bytes).unwrap();
        handle.flush().unwrap();
        (dir, store)
    }

    #[test]
    fn gather_returns_only_the_tail_of_long_output() {
        let mut bytes = vec![b'a'; 4000];
        bytes.extend(vec![b'z'; 1000]);
        let (_dir, store) = store_with(&bytes);

        let tail = store.gather(1000).unwrap();
        assert_eq!(tail.len(), 1000);
        assert!(tail.iter().all(|b| *b == b'z'));
        assert_eq!(store.len().unwrap(), 5000);
    }

    #[test]
    fn gather_returns_everything_when_shorter_than_limit() {
        let (_dir, store) = store_with(&[b'x'; 500]);
        assert_eq!(store.gather(1000).unwrap().len(), 500);
    }

    #[test]
    fn gather_on_empty_buffer_is_empty() {
        let (_dir, store) = store_with(b"");
        assert!(store.gather(1000).unwrap().is_empty());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn gather_sees_output_appended_after_previous_read() {
        let (_dir, store) = store_with(b"first\n");
        assert_eq!(store.gather_text(100).unwrap(), "first\n");

        let mut handle = store.file.as_file().try_clone().unwrap();
        handle.write_all(b"second\n").unwrap();
        assert_eq!(store.gather_text(100).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn buffer_is_named_after_key_and_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::create(dir.path(), "abc123").unwrap();
        let path = store.path().to_path_buf();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("abc123-"));
        assert!(path.exists());

        drop(store);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn buffer_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::create(dir.path(), "abc123").unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn hostile_keys_stay_inside_the_directory() {
        assert_eq!(file_safe("../../etc/passwd"), "______etc_passwd");
        assert_eq!(file_safe(""), "job");
    }
}
