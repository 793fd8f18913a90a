//! Stale-resource reaping for crashed endpoints
//!
//! A reader that dies without running its destructor leaves behind a segment,
//! two semaphores, and a lock file. The flock on the lock file vanishes with
//! the process, so an unheld lock file is the tombstone the reaper keys on.
//! Reaping runs during every `Reader::new` and never touches a channel whose
//! lock is currently held.

use crate::error::BufferResult;
use crate::naming::{sem_read_name, sem_write_name};
use crate::platform::{read_lock_record, remove_semaphore, remove_shm, try_remove_stale};
use std::path::{Path, PathBuf};

/// Directory holding the per-channel lock files.
///
/// A dedicated subdirectory of the temp dir, so the `*.lock` scan can never
/// touch files owned by unrelated software.
pub fn lock_dir() -> PathBuf {
    std::env::temp_dir().join("zerobuffer")
}

/// Lock file path for a channel name.
pub fn lock_path(channel: &str) -> PathBuf {
    lock_dir().join(format!("{channel}.lock"))
}

/// Remove every resource belonging to `channel`. The lock file must already
/// be gone or owned by the caller.
pub fn remove_channel_resources(channel: &str) {
    remove_semaphore(&sem_write_name(channel));
    remove_semaphore(&sem_read_name(channel));
    remove_shm(channel);
}

/// Scan [`lock_dir`] and reap every channel whose lock holder is gone.
///
/// Returns the number of channels reaped. Held locks are skipped, including
/// the caller's own.
pub fn reap_stale_channels() -> BufferResult<usize> {
    reap_stale_channels_in(&lock_dir())
}

/// [`reap_stale_channels`] against an explicit directory (test seam).
pub fn reap_stale_channels_in(dir: &Path) -> BufferResult<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut reaped = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(channel) = channel_of_lock_file(&path) else {
            continue;
        };
        let holder = read_lock_record(&path);
        match try_remove_stale(&path) {
            Ok(true) => {
                tracing::info!(
                    channel,
                    holder_pid = holder.as_ref().map(|r| r.pid),
                    "reaping stale channel"
                );
                remove_channel_resources(&channel);
                reaped += 1;
            }
            Ok(false) => {
                tracing::debug!(channel, "lock held, skipping");
            }
            Err(e) => {
                tracing::warn!(channel, error = %e, "stale probe failed");
            }
        }
    }
    Ok(reaped)
}

fn channel_of_lock_file(path: &Path) -> Option<String> {
    if path.extension()? != "lock" {
        return None;
    }
    Some(path.file_stem()?.to_str()?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::try_acquire_lockfile;

    #[test]
    fn lock_path_shape() {
        let path = lock_path("cam0");
        assert!(path.ends_with("zerobuffer/cam0.lock"));
    }

    #[test]
    fn channel_name_extraction() {
        assert_eq!(
            channel_of_lock_file(Path::new("/tmp/zerobuffer/cam0.lock")),
            Some("cam0".to_string())
        );
        assert_eq!(channel_of_lock_file(Path::new("/tmp/zerobuffer/readme.txt")), None);
    }

    #[test]
    fn reap_skips_held_locks() {
        let dir = tempfile::tempdir().unwrap();
        let held = dir.path().join("held.lock");
        let stale = dir.path().join("stale.lock");

        let _guard = try_acquire_lockfile(&held).unwrap();
        std::fs::write(&stale, b"{\"pid\":1,\"start_time\":1}").unwrap();

        let reaped = reap_stale_channels_in(dir.path()).unwrap();
        assert_eq!(reaped, 1);
        assert!(held.exists(), "held lock must survive reaping");
        assert!(!stale.exists(), "stale lock must be removed");
    }

    #[test]
    fn reap_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nonexistent");
        assert_eq!(reap_stale_channels_in(&gone).unwrap(), 0);
    }
}
