//! State management module for stackform.
//!
//! This module persists what the last lifecycle calls observed: per
//! resource address, the backend identifier and field map, plus a bounded
//! operation history.

mod local;
mod lock;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, StateLock, holder_id};
pub use store::StateStore;
pub use types::{
    HistoryEntry, HistoryOperation, MAX_HISTORY, ResourceRecord, STATE_VERSION, StackState,
};
