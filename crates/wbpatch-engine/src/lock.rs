//! Exclusive single-writer locking
//!
//! A lock on `book.json` is the sidecar file `book.json.lock`, created with
//! exclusive-create semantics. Its presence is the lock; its content records
//! who holds it, and is read back for the error when acquisition fails.
//!
//! Locks are not re-entrant: a second acquire from the same process blocks
//! or fails like any other contender. Release is tied to [`LockGuard`]'s
//! `Drop`, so every exit path (errors, early returns, panics) unlocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default first retry delay
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(10);

/// Default retry delay cap
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(250);

/// Identity of a lock holder, persisted in the sidecar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    pub path: PathBuf,
    pub holder_id: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Sidecar path guarding `path`
#[must_use]
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Acquires [`LockGuard`]s with bounded exponential backoff
#[derive(Debug, Clone)]
pub struct LockManager {
    backoff_initial: Duration,
    backoff_max: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self {
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl LockManager {
    /// Manager with default backoff
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override retry delays
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial.max(Duration::from_millis(1));
        self.backoff_max = max.max(self.backoff_initial);
        self
    }

    /// Acquire the lock on `path`
    ///
    /// With `wait` of zero, fails immediately when the lock is held.
    /// Otherwise retries until `wait` has elapsed.
    ///
    /// # Errors
    /// [`LockError::Held`] when still contended after `wait`,
    /// [`LockError::Io`] when the sidecar cannot be created or written
    pub fn acquire(&self, path: &Path, wait: Duration) -> Result<LockGuard, LockError> {
        let lock_path = lock_path_for(path);
        let started = Instant::now();
        let mut delay = self.backoff_initial;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    let token = LockToken {
                        path: path.to_path_buf(),
                        holder_id: uuid::Uuid::new_v4().to_string(),
                        pid: std::process::id(),
                        acquired_at: Utc::now(),
                    };
                    // Guard first so a failed write still removes the sidecar
                    let guard = LockGuard {
                        token,
                        lock_path: lock_path.clone(),
                        released: false,
                    };
                    let body = serde_json::to_vec(&guard.token)
                        .map_err(|e| LockError::io(&lock_path, e.into()))?;
                    file.write_all(&body)
                        .and_then(|()| file.sync_all())
                        .map_err(|e| LockError::io(&lock_path, e))?;
                    debug!(path = %lock_path.display(), holder = %guard.token.holder_id, "lock acquired");
                    return Ok(guard);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let waited = started.elapsed();
                    if waited >= wait {
                        let holder_info = fs::read_to_string(&lock_path).unwrap_or_default();
                        warn!(path = %lock_path.display(), ?waited, "lock held by another writer");
                        return Err(LockError::Held {
                            path: lock_path,
                            holder_info,
                            waited,
                        });
                    }
                    std::thread::sleep(delay.min(wait - waited));
                    delay = (delay * 2).min(self.backoff_max);
                }
                Err(e) => return Err(LockError::io(&lock_path, e)),
            }
        }
    }
}

/// Held lock; dropping it releases
#[derive(Debug)]
pub struct LockGuard {
    token: LockToken,
    lock_path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Holder identity
    #[inline]
    #[must_use]
    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Sidecar file backing this lock
    #[inline]
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Release explicitly, surfacing removal errors
    ///
    /// # Errors
    /// Returns error if the sidecar cannot be removed
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        match fs::remove_file(&self.lock_path) {
            Ok(()) => {
                debug!(path = %self.lock_path.display(), "lock released");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::io(&self.lock_path, e)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = fs::remove_file(&self.lock_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.lock_path.display(), error = %e, "failed to remove lock file");
            }
        } else {
            debug!(path = %self.lock_path.display(), "lock released on drop");
        }
    }
}

/// Lock acquisition errors
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another writer holds the lock
    #[error("lock {path:?} is held (waited {waited:?}): {holder_info}")]
    Held {
        path: PathBuf,
        holder_info: String,
        waited: Duration,
    },

    /// Sidecar could not be created, written or removed
    #[error("lock i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
