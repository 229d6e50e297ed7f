//! Error types for the stackform reconciliation system.
//!
//! This module provides the error hierarchy for every layer: manifest and
//! provider configuration, state persistence, the CloudStack backend, and
//! the reconciliation core.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for stackform.
#[derive(Debug, Error)]
pub enum StackformError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Backend (transport or API-side) failures.
    #[error("Backend unavailable: {0}")]
    Backend(#[from] ApiError),

    /// Reconciliation errors raised by the core.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// A lifecycle callback failed; carries enough context for a log line.
    #[error("{operation} {resource_type} ({}) failed: {source}", display_id(.id))]
    Lifecycle {
        /// Lifecycle operation that failed.
        operation: Operation,
        /// Resource type tag.
        resource_type: &'static str,
        /// Backend identifier, empty when unknown.
        id: String,
        /// Underlying error.
        source: Box<StackformError>,
    },

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn display_id(id: &str) -> String {
    if id.is_empty() {
        String::from("no id")
    } else {
        format!("id {id}")
    }
}

/// Lifecycle operations exposed to the orchestration host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Create callback.
    Create,
    /// Read callback.
    Read,
    /// Update callback.
    Update,
    /// Delete callback.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Manifest validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// The API endpoint is not a valid URL.
    #[error("Invalid endpoint '{endpoint}': {message}")]
    InvalidEndpoint {
        /// Endpoint as configured.
        endpoint: String,
        /// Parser message.
        message: String,
    },

    /// Duplicate resource address.
    #[error("Duplicate resource address: {address}")]
    DuplicateAddress {
        /// The duplicated `type.name` address.
        address: String,
    },

    /// Unknown resource type tag.
    #[error("Unknown resource type: {resource_type}")]
    UnknownResourceType {
        /// The unrecognised tag.
        resource_type: String,
    },

    /// A `${type.name.field}` reference cannot be resolved.
    #[error("Unresolved reference {reference}: {reason}")]
    UnresolvedReference {
        /// The reference text.
        reference: String,
        /// Why it could not be resolved.
        reason: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Backend errors: anything that went wrong between us and the CloudStack API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Credentials were rejected.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Description of the auth failure.
        message: String,
    },

    /// The API answered with an error.
    #[error("{command} rejected ({status}, code {code}): {message}")]
    Rejected {
        /// API command.
        command: String,
        /// HTTP status code.
        status: u16,
        /// CloudStack error code, 0 when absent.
        code: u32,
        /// Error text from the API.
        message: String,
    },

    /// Network error.
    #[error("network error calling {command}: {message}")]
    Network {
        /// API command.
        command: String,
        /// Description of the network error.
        message: String,
    },

    /// The response could not be interpreted.
    #[error("invalid response to {command}: {message}")]
    InvalidResponse {
        /// API command.
        command: String,
        /// Description of the response issue.
        message: String,
    },

    /// An asynchronous job finished with an error.
    #[error("async job {job_id} for {command} failed: {message}")]
    AsyncJobFailed {
        /// API command that started the job.
        command: String,
        /// Job identifier.
        job_id: String,
        /// Error text from the job result.
        message: String,
    },

    /// An asynchronous job did not finish in time.
    #[error("async job {job_id} for {command} did not finish within {timeout_secs}s")]
    AsyncJobTimeout {
        /// API command that started the job.
        command: String,
        /// Job identifier.
        job_id: String,
        /// Timeout that elapsed.
        timeout_secs: u64,
    },
}

/// Errors raised by the reconciliation core.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A name resolved to no backend object.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Reference kind.
        kind: String,
        /// The name that was looked up.
        name: String,
    },

    /// A name resolved to several backend objects.
    #[error("{kind} '{name}' is ambiguous: {count} objects share this name")]
    Ambiguous {
        /// Reference kind.
        kind: String,
        /// The name that was looked up.
        name: String,
        /// Number of candidates found.
        count: usize,
    },

    /// Neither an identifier nor a name was supplied for a required reference.
    #[error("missing reference: {field} (set an id or a name)")]
    MissingReference {
        /// Field stem, e.g. `zone`.
        field: String,
    },

    /// The client-side id filter kept several objects for one identifier.
    #[error("{count} {resource_type} objects share id {id}")]
    UnexpectedMultiplicity {
        /// Resource type tag.
        resource_type: String,
        /// The identifier.
        id: String,
        /// Number of objects found.
        count: usize,
    },

    /// Field values could not be decoded into the resource's typed fields.
    #[error("invalid fields for {resource_type}: {message}")]
    InvalidFields {
        /// Resource type tag.
        resource_type: String,
        /// Decoder message.
        message: String,
    },
}

/// Result type alias for stackform operations.
pub type Result<T> = std::result::Result<T, StackformError>;

impl StackformError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wraps this error with lifecycle context.
    #[must_use]
    pub fn in_lifecycle(self, operation: Operation, resource_type: &'static str, id: &str) -> Self {
        Self::Lifecycle {
            operation,
            resource_type,
            id: id.to_string(),
            source: Box::new(self),
        }
    }

    /// Returns true if the error is a backend failure, looking through lifecycle context.
    #[must_use]
    pub fn is_backend_unavailable(&self) -> bool {
        match self {
            Self::Backend(_) => true,
            Self::Lifecycle { source, .. } => source.is_backend_unavailable(),
            _ => false,
        }
    }

    /// Returns the innermost reconciliation error, if any.
    #[must_use]
    pub fn reconcile_error(&self) -> Option<&ReconcileError> {
        match self {
            Self::Reconcile(e) => Some(e),
            Self::Lifecycle { source, .. } => source.reconcile_error(),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ApiError {
    /// Creates a network error.
    #[must_use]
    pub fn network(command: &str, message: impl Into<String>) -> Self {
        Self::Network {
            command: command.to_string(),
            message: message.into(),
        }
    }

    /// Creates an invalid-response error.
    #[must_use]
    pub fn invalid_response(command: &str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            command: command.to_string(),
            message: message.into(),
        }
    }
}

impl ReconcileError {
    /// Creates a missing-reference error for a field stem.
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingReference {
            field: field.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_context_in_message() {
        let err = StackformError::from(ReconcileError::missing("zone")).in_lifecycle(
            Operation::Create,
            "network",
            "",
        );
        let message = err.to_string();
        assert!(message.starts_with("create network (no id) failed"));
        assert!(message.contains("zone"));
    }

    #[test]
    fn test_backend_unavailable_through_context() {
        let err = StackformError::from(ApiError::network("listNetworks", "reset"))
            .in_lifecycle(Operation::Read, "network", "abc");
        assert!(err.is_backend_unavailable());
        assert!(err.to_string().contains("id abc"));
        assert!(err.reconcile_error().is_none());
    }

    #[test]
    fn test_reconcile_error_through_context() {
        let err = StackformError::from(ReconcileError::Ambiguous {
            kind: String::from("template"),
            name: String::from("ubuntu"),
            count: 2,
        })
        .in_lifecycle(Operation::Create, "virtual_machine", "");
        assert!(matches!(
            err.reconcile_error(),
            Some(ReconcileError::Ambiguous { count: 2, .. })
        ));
    }
}
