//! Storage seam for persisted stack state.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::StackState;
use crate::error::Result;

/// Where stack state and its lock live.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state, `None` before the first successful save.
    async fn load(&self) -> Result<Option<StackState>>;

    /// Loads the state, starting empty when none was saved yet.
    async fn load_or_default(&self) -> Result<StackState> {
        Ok(self.load().await?.unwrap_or_default())
    }

    /// Replaces the persisted state.
    async fn save(&self, state: &StackState) -> Result<()>;

    /// Takes the lock unless an unexpired one is in place.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases the lock identified by `lock_id`.
    ///
    /// Releasing when no lock exists succeeds; releasing someone else's
    /// lock fails.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes whatever lock is in place and returns it.
    async fn force_unlock(&self) -> Result<Option<LockInfo>>;

    /// Current lock, expired or not.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Human-readable location of the state, for logs.
    fn location(&self) -> String;
}
