//! Shared handle passed to every reconciliation call.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::cloudstack::{ApiParams, Transport, decode_list};
use crate::error::Result;

/// Immutable API handle threaded through the core.
///
/// Built once per process from the provider configuration and passed by
/// reference into resolvers, fetches and lifecycle calls.
#[derive(Clone)]
pub struct ApiContext {
    transport: Arc<dyn Transport>,
    unscoped_fallback: bool,
}

impl fmt::Debug for ApiContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiContext")
            .field("unscoped_fallback", &self.unscoped_fallback)
            .finish_non_exhaustive()
    }
}

impl ApiContext {
    /// Creates a context over a transport, with the unscoped fallback enabled.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            unscoped_fallback: true,
        }
    }

    /// Enables or disables the unscoped-listing fallback on reads.
    #[must_use]
    pub fn with_unscoped_fallback(mut self, enabled: bool) -> Self {
        self.unscoped_fallback = enabled;
        self
    }

    /// Returns whether reads fall back to an unscoped listing.
    #[must_use]
    pub const fn unscoped_fallback(&self) -> bool {
        self.unscoped_fallback
    }

    /// Issues one API call.
    ///
    /// # Errors
    ///
    /// Returns the transport error unchanged.
    pub async fn call(&self, command: &str, params: ApiParams) -> Result<Value> {
        self.transport.call(command, params).await
    }

    /// Issues a list call and decodes the records stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the records do not decode.
    pub async fn list<T: DeserializeOwned>(
        &self,
        command: &str,
        key: &str,
        params: ApiParams,
    ) -> Result<Vec<T>> {
        let response = self.call(command, params).await?;
        decode_list(command, &response, key)
    }
}
