//! CloudStack API client implementation.
//!
//! This module provides the signed HTTP client for the CloudStack query API,
//! including polling of asynchronous jobs.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha1::Sha1;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{ApiError, Result, StackformError};

use super::params::ApiParams;
use super::transport::Transport;

type HmacSha1 = Hmac<Sha1>;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default interval between async job polls in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default time to wait for an async job in seconds.
pub const DEFAULT_ASYNC_TIMEOUT_SECS: u64 = 600;

/// Command used to poll asynchronous jobs.
const QUERY_JOB_COMMAND: &str = "queryAsyncJobResult";

/// Job status reported for a finished job.
const JOB_SUCCEEDED: u64 = 1;

/// Job status reported for a failed job.
const JOB_FAILED: u64 = 2;

/// CloudStack API client.
#[derive(Clone)]
pub struct CloudStackClient {
    /// HTTP client.
    client: Client,
    /// API endpoint, e.g. `https://cloud.example.com/client/api`.
    endpoint: Url,
    /// API key.
    api_key: String,
    /// Secret key used for request signatures.
    secret_key: String,
    /// Interval between async job polls.
    poll_interval: Duration,
    /// Maximum time to wait for an async job.
    async_timeout: Duration,
}

impl fmt::Debug for CloudStackClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudStackClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("poll_interval", &self.poll_interval)
            .field("async_timeout", &self.async_timeout)
            .finish_non_exhaustive()
    }
}

impl CloudStackClient {
    /// Creates a new client with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: Url, api_key: &str, secret_key: &str) -> Result<Self> {
        Self::with_timeout(endpoint, api_key, secret_key, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(
        endpoint: Url,
        api_key: &str,
        secret_key: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::network("", format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            async_timeout: Duration::from_secs(DEFAULT_ASYNC_TIMEOUT_SECS),
        })
    }

    /// Sets how async jobs are polled.
    #[must_use]
    pub fn with_async_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.async_timeout = timeout;
        self
    }

    /// Returns the API endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Executes a single signed request and unwraps the response object.
    async fn execute_once(&self, command: &str, params: &ApiParams) -> Result<Value> {
        let mut full = params
            .clone()
            .with("command", command)
            .with("response", "json");
        full.set("apikey", &self.api_key);

        let query = signed_query(&full, &self.secret_key)?;
        let mut url = self.endpoint.clone();
        url.set_query(Some(&query));

        debug!(command, params = ?params.keys(), "Calling CloudStack API");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::network(command, format!("Request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(command, format!("Failed to read response: {e}")))?;

        trace!(command, status = status.as_u16(), "CloudStack response: {body}");

        let parsed: Option<Value> = serde_json::from_str(&body).ok();
        let inner = parsed.as_ref().and_then(|v| unwrap_response(command, v));

        if status.as_u16() == 401 || status.as_u16() == 432 {
            let message = inner
                .and_then(error_text)
                .unwrap_or_else(|| String::from("Invalid API credentials"));
            return Err(ApiError::Authentication { message }.into());
        }

        if !status.is_success() {
            let (code, message) = inner.map_or_else(
                || (0, body.clone()),
                |v| (error_code(v), error_text(v).unwrap_or_else(|| body.clone())),
            );
            return Err(ApiError::Rejected {
                command: command.to_string(),
                status: status.as_u16(),
                code,
                message,
            }
            .into());
        }

        let inner = inner.ok_or_else(|| {
            ApiError::invalid_response(command, format!("no '{command}response' object"))
        })?;

        if let Some(message) = error_text(inner) {
            return Err(ApiError::Rejected {
                command: command.to_string(),
                status: status.as_u16(),
                code: error_code(inner),
                message,
            }
            .into());
        }

        Ok(inner.clone())
    }

    /// Polls an async job until it finishes, fails or times out.
    async fn wait_for_job(&self, command: &str, job_id: &str) -> Result<Value> {
        let deadline = Instant::now() + self.async_timeout;
        let params = ApiParams::new().with("jobid", job_id);

        loop {
            let status = self.execute_once(QUERY_JOB_COMMAND, &params).await?;

            match status.get("jobstatus").and_then(Value::as_u64) {
                Some(JOB_SUCCEEDED) => {
                    debug!(command, job_id, "Async job finished");
                    return Ok(status
                        .get("jobresult")
                        .cloned()
                        .unwrap_or_else(|| Value::Object(serde_json::Map::new())));
                }
                Some(JOB_FAILED) => {
                    let message = status
                        .get("jobresult")
                        .and_then(error_text)
                        .unwrap_or_else(|| String::from("job failed without error text"));
                    warn!(command, job_id, "Async job failed: {message}");
                    return Err(ApiError::AsyncJobFailed {
                        command: command.to_string(),
                        job_id: job_id.to_string(),
                        message,
                    }
                    .into());
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(ApiError::AsyncJobTimeout {
                    command: command.to_string(),
                    job_id: job_id.to_string(),
                    timeout_secs: self.async_timeout.as_secs(),
                }
                .into());
            }

            trace!(command, job_id, "Async job pending");
            sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Transport for CloudStackClient {
    async fn call(&self, command: &str, params: ApiParams) -> Result<Value> {
        let response = self.execute_once(command, &params).await?;

        let job_id = response
            .get("jobid")
            .and_then(Value::as_str)
            .map(str::to_string);

        match job_id {
            Some(job_id) if command != QUERY_JOB_COMMAND => {
                debug!(command, job_id = %job_id, "Waiting for async job");
                self.wait_for_job(command, &job_id).await
            }
            _ => Ok(response),
        }
    }
}

/// Builds the signed query string for a request.
///
/// Parameters are sorted by name ignoring case, values are percent-encoded
/// with spaces as `%20`, and the HMAC-SHA1 of the lowercased query is
/// appended base64-encoded as `signature`.
///
/// # Errors
///
/// Returns an error if the signing key is rejected.
pub fn signed_query(params: &ApiParams, secret_key: &str) -> Result<String> {
    let mut pairs: Vec<(&str, &str)> = params.iter().collect();
    pairs.sort_by_key(|(key, _)| key.to_lowercase());

    let query = pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");

    let signature = sign(&query, secret_key)?;
    Ok(format!("{query}&signature={}", urlencoding::encode(&signature)))
}

/// Computes the base64 HMAC-SHA1 signature of a canonical query string.
///
/// # Errors
///
/// Returns an error if the signing key is rejected.
pub fn sign(query: &str, secret_key: &str) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(secret_key.as_bytes())
        .map_err(|e| StackformError::internal(format!("Invalid signing key: {e}")))?;
    mac.update(query.to_lowercase().as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Returns the `<command>response` object of a response body.
fn unwrap_response<'a>(command: &str, body: &'a Value) -> Option<&'a Value> {
    let expected = format!("{}response", command.to_lowercase());
    let object = body.as_object()?;

    object.get(&expected).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.ends_with("response"))
            .map(|(_, value)| value)
    })
}

fn error_text(value: &Value) -> Option<String> {
    value
        .get("errortext")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn error_code(value: &Value) -> u32 {
    value
        .get("errorcode")
        .and_then(Value::as_u64)
        .and_then(|code| u32::try_from(code).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signed_query_matches_reference_vector() {
        let params = ApiParams::new()
            .with("command", "listZones")
            .with("response", "json")
            .with("apikey", "Key-ABC")
            .with("name", "Zone One");

        let query = signed_query(&params, "s3cr3t").unwrap();
        assert_eq!(
            query,
            "apikey=Key-ABC&command=listZones&name=Zone%20One&response=json\
             &signature=SUlAPX78brt6pXwdtxpkLjgpmmU%3D"
        );
    }

    #[test]
    fn test_sort_ignores_case() {
        let params = ApiParams::new().with("b", "1").with("A", "2");
        let query = signed_query(&params, "k").unwrap();
        assert!(query.starts_with("A=2&b=1&signature="));
    }

    #[test]
    fn test_unwrap_response_by_command_name() {
        let body = json!({"listnetworksresponse": {"count": 1}});
        let inner = unwrap_response("listNetworks", &body).unwrap();
        assert_eq!(inner["count"], 1);
    }

    #[test]
    fn test_unwrap_response_falls_back_to_any_response_key() {
        let body = json!({"errorresponse": {"errortext": "boom"}});
        let inner = unwrap_response("listNetworks", &body).unwrap();
        assert_eq!(error_text(inner).as_deref(), Some("boom"));
        assert!(unwrap_response("listNetworks", &json!({"other": 1})).is_none());
    }

    #[test]
    fn test_debug_hides_secret() {
        let endpoint = Url::parse("https://cloud.example.com/client/api").unwrap();
        let client = CloudStackClient::new(endpoint, "key", "very-secret").unwrap();
        assert!(!format!("{client:?}").contains("very-secret"));
    }
}
