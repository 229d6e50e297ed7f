//! State locking.
//!
//! Only one mutating run may work on a state directory at a time. The lock
//! records who took it and for which operation, and expires so a crashed
//! run does not wedge the stack forever.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

use super::store::StateStore;

/// Lock expiry in seconds. Async jobs may take up to ten minutes.
pub const LOCK_EXPIRY_SECS: i64 = 900;

/// Contents of a state lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier, needed to release the lock.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// Operation the lock was taken for (`apply`, `destroy`, ...).
    pub operation: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock stops being honoured.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a fresh lock for `holder` running `operation`.
    #[must_use]
    pub fn new(holder: &str, operation: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            operation: operation.to_string(),
            acquired_at: now,
            expires_at: now + Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Whether the lock may be taken over.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (held by {} for {} since {}, expires {})",
            self.lock_id,
            self.holder,
            self.operation,
            self.acquired_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

/// A lock held by this process for the length of one operation.
#[derive(Debug)]
pub struct StateLock {
    info: LockInfo,
}

impl StateLock {
    /// Takes the state lock for `operation` under this process's holder id.
    ///
    /// # Errors
    ///
    /// Returns an error if another unexpired lock is in place or the lock
    /// cannot be written.
    pub async fn acquire(store: &dyn StateStore, operation: &str) -> Result<Self> {
        let info = store.acquire_lock(&holder_id(), operation).await?;
        debug!(lock_id = %info.lock_id, holder = %info.holder, operation, "Holding state lock");
        Ok(Self { info })
    }

    /// Lock contents as written to the store.
    #[must_use]
    pub const fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Gives the lock back.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock was taken over by someone else or the
    /// lock file cannot be removed.
    pub async fn release(self, store: &dyn StateStore) -> Result<()> {
        if self.info.is_expired() {
            warn!(lock_id = %self.info.lock_id, "State lock expired while in use");
        }
        store.release_lock(&self.info.lock_id).await
    }
}

/// Identifies this process as a lock holder: `<host>:<pid>`.
#[must_use]
pub fn holder_id() -> String {
    let host = hostname::get()
        .map_or_else(|_| String::from("unknown-host"), |h| h.to_string_lossy().into_owned());
    format!("{host}:{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lock_is_live() {
        let lock = LockInfo::new("ci-runner:42", "apply");
        assert!(!lock.is_expired());
        assert_eq!(
            (lock.expires_at - lock.acquired_at).num_seconds(),
            LOCK_EXPIRY_SECS
        );
        assert_ne!(lock.lock_id, LockInfo::new("ci-runner:42", "apply").lock_id);
    }

    #[test]
    fn test_past_expiry_can_be_taken_over() {
        let mut lock = LockInfo::new("ci-runner:42", "destroy");
        lock.expires_at = Utc::now() - Duration::seconds(1);
        assert!(lock.is_expired());
    }

    #[test]
    fn test_display_names_holder_and_operation() {
        let lock = LockInfo::new("ci-runner:42", "apply");
        let text = lock.to_string();
        assert!(text.starts_with(&lock.lock_id));
        assert!(text.contains("held by ci-runner:42 for apply"));
    }

    #[test]
    fn test_holder_id_ends_with_pid() {
        let pid = std::process::id().to_string();
        assert!(holder_id().ends_with(&format!(":{pid}")));
    }
}
