//! Filesystem lock file with stale-lock reclaim.
//!
//! The lock file's content is the epoch-seconds timestamp at which it was
//! acquired; a lock older than `lock_ttl` may be reclaimed by a later
//! runner rather than wedging the job forever on a crashed process.
//! Written with the same atomic write-then-rename discipline as the
//! backfill status document.

use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Attempt to acquire the lock at `path`. Returns `Ok(None)` if a live
    /// (non-stale) lock is already held by someone else; `Ok(Some(_))`
    /// once this process holds it. The lock is released (file removed)
    /// when the returned guard is dropped.
    pub fn acquire(path: impl Into<PathBuf>, ttl: Duration) -> anyhow::Result<Option<Self>> {
        let path = path.into();

        if let Some(locked_at) = read_lock_timestamp(&path) {
            let age = Utc::now().signed_duration_since(locked_at);
            if age < chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()) {
                return Ok(None);
            }
            warn!(lock_path = %path.display(), age_secs = age.num_seconds(), "reclaiming stale backfill lock");
        }

        write_lock_file(&path)?;
        Ok(Some(Self { path }))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn read_lock_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let contents = fs::read_to_string(path).ok()?;
    let secs: i64 = contents.trim().parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

fn write_lock_file(path: &Path) -> anyhow::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    write!(tmp, "{}", Utc::now().timestamp())?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_holds_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("backfill.lock");

        let first = FileLock::acquire(&lock_path, Duration::from_secs(900)).unwrap();
        assert!(first.is_some());

        let second = FileLock::acquire(&lock_path, Duration::from_secs(900)).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("backfill.lock");
        fs::write(&lock_path, (Utc::now().timestamp() - 10_000).to_string()).unwrap();

        let reclaimed = FileLock::acquire(&lock_path, Duration::from_secs(60)).unwrap();
        assert!(reclaimed.is_some());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("backfill.lock");
        {
            let _lock = FileLock::acquire(&lock_path, Duration::from_secs(900)).unwrap().unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }
}
