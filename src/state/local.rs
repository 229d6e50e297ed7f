//! State stored as files in a local directory.
//!
//! `state.json` holds the stack state and `state.lock` exists while an
//! operation holds the lock. Saves go through a temporary file and a
//! rename so a crash never leaves half a state file behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, StackformError, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::{STATE_VERSION, StackState};

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "state.lock";

/// File-backed [`StateStore`].
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    dir: PathBuf,
}

impl LocalStateStore {
    /// Keeps state in `dir`, created on first save.
    #[must_use]
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            StateError::write(format!("Failed to create {}: {e}", self.dir.display())).into()
        })
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        let Some(content) = read_optional(&self.lock_path()).await? else {
            return Ok(None);
        };
        serde_json::from_str(&content).map(Some).map_err(|e| {
            corrupted(format!("Unreadable lock file {}: {e}", self.lock_path().display()))
        })
    }

    async fn remove_lock(&self) -> Result<()> {
        match fs::remove_file(self.lock_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(lock_failed(format!("Failed to remove lock file: {e}"))),
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StackState>> {
        let path = self.state_path();
        let Some(content) = read_optional(&path).await? else {
            debug!("No state at {}", path.display());
            return Ok(None);
        };

        let state: StackState = serde_json::from_str(&content)
            .map_err(|e| corrupted(format!("Unreadable state file {}: {e}", path.display())))?;

        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }

        debug!(resources = state.resources.len(), "Loaded state from {}", path.display());
        Ok(Some(state))
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_vec_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        let path = self.state_path();
        let staging = path.with_extension("json.tmp");
        let write_err = |e: std::io::Error| StateError::write(format!("{}: {e}", staging.display()));

        let mut file = fs::File::create(&staging).await.map_err(write_err)?;
        file.write_all(&content).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        fs::rename(&staging, &path)
            .await
            .map_err(|e| StateError::write(format!("Failed to move state into place: {e}")))?;

        debug!(resources = state.resources.len(), "Saved state to {}", path.display());
        Ok(())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        self.ensure_dir().await?;

        if let Some(existing) = self.read_lock().await? {
            if !existing.is_expired() {
                return Err(locked_by(&existing));
            }
            warn!(
                holder = %existing.holder,
                operation = %existing.operation,
                "Taking over expired state lock"
            );
            self.remove_lock().await?;
        }

        let lock = LockInfo::new(holder, operation);
        let content = serde_json::to_vec_pretty(&lock)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path())
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Another process won the race between our read and create.
                return Err(match self.read_lock().await? {
                    Some(winner) => locked_by(&winner),
                    None => lock_failed("Lock file appeared and vanished while locking"),
                });
            }
            Err(e) => return Err(lock_failed(format!("Failed to create lock file: {e}"))),
        };
        file.write_all(&content)
            .await
            .map_err(|e| lock_failed(format!("Failed to write lock file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| lock_failed(format!("Failed to sync lock file: {e}")))?;

        info!(lock_id = %lock.lock_id, operation, "Acquired state lock");
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock().await? {
            None => {
                debug!(lock_id, "State lock already gone");
                Ok(())
            }
            Some(current) if current.lock_id == lock_id => {
                self.remove_lock().await?;
                info!(lock_id, "Released state lock");
                Ok(())
            }
            Some(current) => Err(lock_failed(format!(
                "lock {lock_id} is not held; current lock is {current}"
            ))),
        }
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let current = self.read_lock().await?;
        if let Some(lock) = &current {
            warn!(holder = %lock.holder, operation = %lock.operation, "Forcibly removing state lock");
        }
        self.remove_lock().await?;
        Ok(current)
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Reads a file, mapping absence to `None`.
async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(corrupted(format!("Failed to read {}: {e}", path.display()))),
    }
}

fn corrupted(message: String) -> StackformError {
    StateError::Corrupted { message }.into()
}

fn lock_failed(message: impl Into<String>) -> StackformError {
    StateError::LockFailed {
        message: message.into(),
    }
    .into()
}

fn locked_by(lock: &LockInfo) -> StackformError {
    StateError::LockedByOther {
        holder: format!("{} ({})", lock.holder, lock.operation),
        since: lock.acquired_at.to_rfc3339(),
    }
    .into()
}
