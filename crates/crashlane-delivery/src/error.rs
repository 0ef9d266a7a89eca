//! Error types for event upload operations.
//!
//! Covers every way an upload attempt can end short of delivery: the record
//! could not be loaded, policy said not to send it, the payload could not be
//! encoded, the transport failed, or the server answered with a non-success
//! status. Each error is resolved inside the operation into a terminal action;
//! [`DeliveryError::is_retryable`] decides which one.

use std::{fmt, time::Duration};

use crashlane_core::LoadError;
use thiserror::Error;

use crate::{client::UploadResponse, configuration::Ineligibility, outcome};

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Comprehensive error types for event delivery.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// Request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// HTTP response indicated client error (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// HTTP response indicated server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Server asked the client to back off (HTTP 429).
    #[error("rate limited by collector")]
    RateLimited {
        /// Seconds suggested by the Retry-After header, if present
        retry_after_seconds: Option<u64>,
    },

    /// Status outside the success, client and server ranges.
    #[error("unexpected response: HTTP {status_code}")]
    UnexpectedStatus {
        /// HTTP status code
        status_code: u16,
    },

    /// Event could not be encoded into a request body.
    #[error("payload serialization failed: {message}")]
    Serialization {
        /// Encoder error message
        message: String,
    },

    /// Event record could not be materialized.
    #[error("failed to load event: {0}")]
    Load(#[from] LoadError),

    /// Configuration says this event must not be sent.
    #[error("event not eligible for delivery: {reason}")]
    Ineligible {
        /// Policy rule that rejected the event
        reason: Ineligibility,
    },

    /// Client or endpoint configuration is unusable.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Deleting or persisting an event source failed.
    #[error("event storage failed: {message}")]
    StorageError {
        /// I/O error message
        message: String,
    },

    /// Outstanding operations did not finish within the shutdown timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a client error from HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a rate limit error with optional retry guidance.
    pub fn rate_limited(retry_after_seconds: Option<u64>) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates an ineligibility error.
    pub fn ineligible(reason: Ineligibility) -> Self {
        Self::Ineligible { reason }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Describes a non-success HTTP response as an error.
    pub fn from_response(response: &UploadResponse) -> Self {
        match response.status_code {
            429 => Self::rate_limited(response.retry_after_seconds()),
            400..=499 => Self::client_error(response.status_code, response.body.clone()),
            500..=599 => Self::server_error(response.status_code, response.body.clone()),
            status_code => Self::UnexpectedStatus { status_code },
        }
    }

    /// Determines if this error represents a temporary failure whose payload
    /// should be persisted for a later attempt.
    ///
    /// Returns `true` for network errors, timeouts, 408/429 responses, server
    /// errors, unexpected statuses, unusable configuration and storage
    /// failures. Returns `false` for other client errors, load failures,
    /// ineligible events, serialization failures and internal errors.
    pub fn is_retryable(&self) -> bool {
        outcome::classify_error(self).is_retryable()
    }

    /// Returns the server-suggested back-off, if any.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => *retry_after_seconds,
            _ => None,
        }
    }
}

/// Category of delivery error for structured log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx) and unexpected statuses.
    Server,
    /// Rate limiting.
    RateLimit,
    /// Payload encoding.
    Serialization,
    /// Unloadable event source.
    Load,
    /// Event filtered by policy.
    Policy,
    /// Configuration problems.
    Configuration,
    /// Filesystem side effects.
    Storage,
    /// Internal system errors.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ClientError { .. } => Self::Client,
            DeliveryError::ServerError { .. } | DeliveryError::UnexpectedStatus { .. } => {
                Self::Server
            },
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::Serialization { .. } => Self::Serialization,
            DeliveryError::Load(_) => Self::Load,
            DeliveryError::Ineligible { .. } => Self::Policy,
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
            DeliveryError::StorageError { .. } => Self::Storage,
            DeliveryError::ShutdownTimeout { .. } | DeliveryError::InternalError { .. } => {
                Self::Internal
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Serialization => write!(f, "serialization"),
            Self::Load => write!(f, "load"),
            Self::Policy => write!(f, "policy"),
            Self::Configuration => write!(f, "configuration"),
            Self::Storage => write!(f, "storage"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn response(status_code: u16) -> UploadResponse {
        UploadResponse {
            status_code,
            headers: HashMap::new(),
            body: "body".to_string(),
            duration: Duration::from_millis(12),
        }
    }

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(30).is_retryable());
        assert!(DeliveryError::server_error(503, "unavailable").is_retryable());
        assert!(DeliveryError::rate_limited(Some(60)).is_retryable());
        assert!(DeliveryError::client_error(408, "request timeout").is_retryable());
        assert!(DeliveryError::configuration("no endpoint").is_retryable());

        assert!(!DeliveryError::client_error(400, "bad request").is_retryable());
        assert!(!DeliveryError::client_error(413, "too large").is_retryable());
        assert!(!DeliveryError::serialization("bad float").is_retryable());
        assert!(!DeliveryError::Load(LoadError::corrupt("truncated")).is_retryable());
        assert!(!DeliveryError::ineligible(Ineligibility::ReportingDisabled).is_retryable());
    }

    #[test]
    fn responses_map_to_errors() {
        assert_eq!(
            DeliveryError::from_response(&response(400)),
            DeliveryError::client_error(400, "body")
        );
        assert_eq!(
            DeliveryError::from_response(&response(502)),
            DeliveryError::server_error(502, "body")
        );
        assert_eq!(
            DeliveryError::from_response(&response(304)),
            DeliveryError::UnexpectedStatus { status_code: 304 }
        );

        let mut limited = response(429);
        limited.headers.insert("retry-after".to_string(), "30".to_string());
        assert_eq!(DeliveryError::from_response(&limited).retry_after_seconds(), Some(30));
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::network("test")), ErrorCategory::Network);
        assert_eq!(
            ErrorCategory::from(&DeliveryError::client_error(404, "missing")),
            ErrorCategory::Client
        );
        assert_eq!(
            ErrorCategory::from(&DeliveryError::ineligible(Ineligibility::ReportingDisabled)),
            ErrorCategory::Policy
        );
        assert_eq!(ErrorCategory::Storage.to_string(), "storage");
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DeliveryError::timeout(30).to_string(), "request timeout after 30s");
        assert_eq!(
            DeliveryError::Load(LoadError::Missing { path: "/tmp/crash-789.json".to_string() })
                .to_string(),
            "failed to load event: event source missing: /tmp/crash-789.json"
        );
    }
}
