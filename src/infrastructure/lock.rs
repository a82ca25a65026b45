//! Advisory file lock guarding the execution-state document.
//!
//! Mutual exclusion must hold across separate process invocations (two
//! agents reporting completion around the same time), so the lock is a real
//! on-disk artifact: a lock file created with atomic create-exclusive
//! semantics next to the guarded resource. The file records the holder's
//! pid and acquisition time for diagnostics.
//!
//! Acquisition polls (it is not event-driven): try create-exclusive; on
//! conflict, evict the existing file if it is older than the staleness
//! window, otherwise sleep and retry until the timeout elapses.
//!
//! Release is capability-based: the only way to release is dropping the
//! [`LockGuard`] returned by [`FileLock::acquire`]. A crashed holder leaves
//! its file behind; staleness eviction reclaims it.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::models::LockConfig;

/// Lock acquisition errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was not acquired within the configured window. Retryable.
    #[error("Timed out acquiring lock {path} after {elapsed_ms} ms")]
    Timeout { path: String, elapsed_ms: u64 },

    /// Unrecoverable filesystem error while locking.
    #[error("Lock I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Contents of a lock file. Informational only — eviction goes by file age,
/// not by what the holder wrote.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockInfo {
    pid: u32,
    acquired_at: chrono::DateTime<Utc>,
}

/// RAII guard for a held lock. Dropping it removes the lock file; a missing
/// file on drop is ignored, so release is idempotent.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Path of the lock file this guard holds.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "Failed to remove lock file");
            }
        }
    }
}

/// Factory for lock acquisitions with a shared policy (timeout, staleness
/// window, poll interval).
#[derive(Debug, Clone)]
pub struct FileLock {
    config: LockConfig,
}

impl FileLock {
    pub fn new(config: LockConfig) -> Self {
        Self { config }
    }

    /// Lock-file path for a guarded resource: `<resource>.lock`.
    pub fn lock_path(resource: &Path) -> PathBuf {
        let mut name = resource
            .file_name()
            .map_or_else(|| "resource".to_string(), |n| n.to_string_lossy().into_owned());
        name.push_str(".lock");
        resource.with_file_name(name)
    }

    /// Acquire the lock for `resource` with the configured timeout.
    pub async fn acquire(&self, resource: &Path) -> Result<LockGuard, LockError> {
        self.acquire_with_timeout(resource, Duration::from_millis(self.config.timeout_ms))
            .await
    }

    /// Acquire the lock for `resource`, waiting at most `timeout`.
    pub async fn acquire_with_timeout(
        &self,
        resource: &Path,
        timeout: Duration,
    ) -> Result<LockGuard, LockError> {
        let lock_path = Self::lock_path(resource);
        let started = Instant::now();
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let stale = Duration::from_millis(self.config.stale_ms);

        loop {
            match self.try_create(&lock_path) {
                Ok(()) => {
                    debug!(path = %lock_path.display(), "Lock acquired");
                    return Ok(LockGuard { path: lock_path });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if lock_age(&lock_path).is_some_and(|age| age > stale) {
                        warn!(path = %lock_path.display(), "Evicting stale lock");
                        remove_ignoring_missing(&lock_path)
                            .map_err(|source| io_error(&lock_path, source))?;
                        // Retry immediately; another waiter may still win the
                        // create-exclusive race, which is fine.
                        continue;
                    }
                }
                Err(source) => return Err(io_error(&lock_path, source)),
            }

            if started.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: lock_path.display().to_string(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn try_create(&self, lock_path: &Path) -> io::Result<()> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)?;
        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        // Best-effort: the file's existence is the lock, the content is
        // diagnostics.
        let body = serde_json::to_vec(&info).unwrap_or_default();
        file.write_all(&body)?;
        Ok(())
    }
}

fn lock_age(lock_path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(lock_path).ok()?.modified().ok()?;
    modified.elapsed().ok()
}

fn remove_ignoring_missing(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn io_error(path: &Path, source: io::Error) -> LockError {
    LockError::Io {
        path: path.display().to_string(),
        source,
    }
}
