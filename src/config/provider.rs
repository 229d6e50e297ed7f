//! Provider configuration: where the CloudStack API lives and how to talk to it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::cloudstack::{
    CloudStackClient, DEFAULT_ASYNC_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_SECS,
};
use crate::error::{ConfigError, Result};
use crate::reconcile::ApiContext;

/// Environment variable holding the API endpoint.
pub const ENV_ENDPOINT: &str = "CLOUDSTACK_ENDPOINT";
/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "CLOUDSTACK_API_KEY";
/// Environment variable holding the secret key.
pub const ENV_SECRET_KEY: &str = "CLOUDSTACK_SECRET_KEY";

/// The `provider` section of the manifest.
///
/// Credentials are normally left out of the manifest and taken from the
/// environment, see [`ProviderConfig::with_env_fallback`].
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// API endpoint, e.g. `https://cloud.example.com/client/api`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// API key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Secret key used for request signing.
    #[serde(default)]
    pub secret_key: Option<String>,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retry failed scoped lookups without their scope.
    #[serde(default = "default_true")]
    pub unscoped_fallback: bool,
    /// Interval between async job polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub async_poll_interval_ms: u64,
    /// Upper bound on waiting for one async job, in seconds.
    #[serde(default = "default_async_timeout_secs")]
    pub async_timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_true() -> bool {
    true
}

const fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

const fn default_async_timeout_secs() -> u64 {
    DEFAULT_ASYNC_TIMEOUT_SECS
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            secret_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            unscoped_fallback: true,
            async_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            async_timeout_secs: DEFAULT_ASYNC_TIMEOUT_SECS,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<set>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("unscoped_fallback", &self.unscoped_fallback)
            .field("async_poll_interval_ms", &self.async_poll_interval_ms)
            .field("async_timeout_secs", &self.async_timeout_secs)
            .finish()
    }
}

impl ProviderConfig {
    /// Fills unset connection values from the process environment.
    #[must_use]
    pub fn with_env_fallback(self) -> Self {
        self.with_fallback_from(|name| std::env::var(name).ok())
    }

    /// Fills unset connection values through `lookup`. Values already set
    /// in the manifest win.
    #[must_use]
    pub fn with_fallback_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for (slot, name) in [
            (&mut self.endpoint, ENV_ENDPOINT),
            (&mut self.api_key, ENV_API_KEY),
            (&mut self.secret_key, ENV_SECRET_KEY),
        ] {
            if slot.as_deref().is_none_or(str::is_empty) {
                if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                    debug!("Using {name} from environment");
                    *slot = Some(value);
                }
            }
        }
        self
    }

    /// Returns the parsed endpoint.
    ///
    /// # Errors
    ///
    /// Returns `MissingEnvVar` when unset and `InvalidEndpoint` when the
    /// value is not an absolute URL.
    pub fn endpoint_url(&self) -> Result<Url> {
        let endpoint = required(self.endpoint.as_ref(), ENV_ENDPOINT)?;
        let url = Url::parse(endpoint).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            }
            .into());
        }
        Ok(url)
    }

    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint or a credential is missing or
    /// invalid.
    pub fn build_client(&self) -> Result<CloudStackClient> {
        let endpoint = self.endpoint_url()?;
        let api_key = required(self.api_key.as_ref(), ENV_API_KEY)?;
        let secret_key = required(self.secret_key.as_ref(), ENV_SECRET_KEY)?;

        let client = CloudStackClient::with_timeout(endpoint, api_key, secret_key, self.timeout_secs)?
            .with_async_polling(
                Duration::from_millis(self.async_poll_interval_ms),
                Duration::from_secs(self.async_timeout_secs),
            );
        Ok(client)
    }

    /// Builds the context handed to every lifecycle call.
    ///
    /// # Errors
    ///
    /// See [`ProviderConfig::build_client`].
    pub fn build_context(&self) -> Result<ApiContext> {
        let client = self.build_client()?;
        Ok(ApiContext::new(Arc::new(client)).with_unscoped_fallback(self.unscoped_fallback))
    }
}

fn required<'a>(value: Option<&'a String>, env_name: &str) -> Result<&'a str> {
    value
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ConfigError::MissingEnvVar {
                name: env_name.to_string(),
            }
            .into()
        })
}
