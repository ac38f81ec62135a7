//! Run lock: a coarse, single-host filesystem mutex
//!
//! The lock is a marker file; its modification time is the entire
//! payload. A token older than the staleness threshold is treated as
//! abandoned by a crashed run and forcibly cleared. Release happens on
//! guard drop, so every exit path of a run gives the lock back.
//!
//! This is deliberately not a distributed lock: the pipeline runs as a
//! periodic single-host job.

use crate::error::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Age past which a lock token counts as abandoned
pub const STALE_AFTER: Duration = Duration::from_secs(3 * 60 * 60);

/// Filesystem run lock with a staleness timeout
pub struct RunLock {
    path: PathBuf,
    stale_after: Duration,
}

impl RunLock {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            stale_after: STALE_AFTER,
        }
    }

    /// Override the staleness threshold
    pub fn with_staleness(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Acquire the lock, failing with `LockHeld` if a fresh token exists
    pub fn acquire(&self) -> Result<LockGuard> {
        self.acquire_at(SystemTime::now())
    }

    /// Acquire the lock, judging staleness against the given clock
    ///
    /// The clock is a parameter so staleness handling is testable
    /// without touching file timestamps.
    pub fn acquire_at(&self, now: SystemTime) -> Result<LockGuard> {
        if self.path.exists() {
            let created = fs::metadata(&self.path)?.modified()?;
            let age = now.duration_since(created).unwrap_or(Duration::ZERO);

            if age <= self.stale_after {
                return Err(Error::LockHeld);
            }

            tracing::warn!(
                path = %self.path.display(),
                age_secs = age.as_secs(),
                "clearing stale lock from an abandoned run"
            );
            fs::remove_file(&self.path)?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {
                tracing::debug!(path = %self.path.display(), "lock acquired");
                Ok(LockGuard {
                    path: self.path.clone(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(Error::LockHeld),
            Err(e) => Err(e.into()),
        }
    }
}

/// Scoped lock ownership; dropping the guard releases the lock
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "lock released"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.lock");
        let lock = RunLock::new(&path);

        let guard = lock.acquire().unwrap();
        assert!(path.exists());

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.lock");
        let lock = RunLock::new(&path);

        let _guard = lock.acquire().unwrap();
        assert!(matches!(lock.acquire(), Err(Error::LockHeld)));
    }

    #[test]
    fn test_stale_lock_is_cleared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.lock");
        let lock = RunLock::new(&path);

        // Abandon a lock (no drop)
        let guard = lock.acquire().unwrap();
        std::mem::forget(guard);
        assert!(path.exists());

        // Still held when judged against the present
        assert!(matches!(lock.acquire(), Err(Error::LockHeld)));

        // Past the staleness threshold the token is cleared
        let later = SystemTime::now() + STALE_AFTER + Duration::from_secs(60);
        let guard = lock.acquire_at(later).unwrap();
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn test_release_after_acquire_failure_keeps_token() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.lock");
        let lock = RunLock::new(&path);

        let guard = lock.acquire().unwrap();
        let denied = lock.acquire();
        assert!(denied.is_err());
        // the denied acquire must not have removed the live token
        assert!(path.exists());
        drop(guard);
    }
}
