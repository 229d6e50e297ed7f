//! Transport boundary between the reconciliation core and the API.

use async_trait::async_trait;

use crate::error::Result;

use super::params::ApiParams;

/// One request/response exchange with the infrastructure API.
///
/// Implementations return the unwrapped response object of `command`
/// (for asynchronous commands, the final job result). A returned error is
/// always a backend failure; callers never retry the same call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues `command` with `params` and returns the decoded response.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails at the transport level or the API
    /// rejects it.
    async fn call(&self, command: &str, params: ApiParams) -> Result<serde_json::Value>;
}
