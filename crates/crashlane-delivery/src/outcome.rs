//! Outcome classification for upload attempts.
//!
//! Retry eligibility is decided from the *cause* of a failure, never from
//! the mere presence of one. Malformed events that a collector rejects must
//! not be retried forever, and transient network or server failures must not
//! be discarded. The classifier is a pure function of the HTTP status or
//! transport error kind and knows nothing about operation state.
//!
//! | input                              | classification |
//! |------------------------------------|----------------|
//! | 2xx                                | delivered      |
//! | 408, 429                           | retryable      |
//! | other 4xx                          | permanent      |
//! | 5xx, 1xx, 3xx                      | retryable      |
//! | connect / network / timeout        | retryable      |
//! | unusable client configuration      | retryable      |
//! | serialization, load, ineligibility | permanent      |

use std::fmt;

use crashlane_core::Payload;
use serde::{Deserialize, Serialize};

use crate::{
    client::UploadResponse,
    error::{DeliveryError, Result},
};

/// Result class of one upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Collector accepted the event.
    Delivered,
    /// Collector (or local policy) will never accept the event.
    Permanent,
    /// Failure is expected to clear up; keep the payload for later.
    Retryable,
}

impl Classification {
    /// Returns true if the payload should be persisted for another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }
}

/// Classifies an HTTP status code.
pub fn classify_status(status_code: u16) -> Classification {
    match status_code {
        200..=299 => Classification::Delivered,
        408 | 429 => Classification::Retryable,
        400..=499 => Classification::Permanent,
        _ => Classification::Retryable,
    }
}

/// Classifies a failed upload by its error kind.
pub fn classify_error(error: &DeliveryError) -> Classification {
    match error {
        DeliveryError::NetworkError { .. }
        | DeliveryError::Timeout { .. }
        | DeliveryError::ServerError { .. }
        | DeliveryError::RateLimited { .. }
        | DeliveryError::UnexpectedStatus { .. }
        | DeliveryError::ConfigurationError { .. }
        | DeliveryError::StorageError { .. } => Classification::Retryable,

        DeliveryError::ClientError { status_code, .. } => match classify_status(*status_code) {
            Classification::Delivered => Classification::Permanent,
            other => other,
        },

        DeliveryError::Serialization { .. }
        | DeliveryError::Load(_)
        | DeliveryError::Ineligible { .. }
        | DeliveryError::ShutdownTimeout { .. }
        | DeliveryError::InternalError { .. } => Classification::Permanent,
    }
}

/// Classifies the result returned by an API client.
pub fn classify(result: &Result<UploadResponse>) -> Classification {
    match result {
        Ok(response) => classify_status(response.status_code),
        Err(error) => classify_error(error),
    }
}

/// Terminal result of one operation execution.
///
/// Exactly one outcome is produced per execution and it determines exactly
/// one [`Disposition`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Collector accepted the event; its source was deleted.
    Delivered,
    /// Event can never be delivered; its source was deleted.
    RejectedPermanently {
        /// Why the event was dropped
        reason: DeliveryError,
    },
    /// Upload failed transiently; the payload was handed to the retry store.
    RetryableFailure {
        /// Failure that triggered the retry
        error: DeliveryError,
        /// Payload persisted for the next attempt
        payload: Payload,
    },
    /// Operation was abandoned; the source was left untouched.
    Cancelled,
}

impl DeliveryOutcome {
    /// Payload-free discriminant.
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Delivered => OutcomeKind::Delivered,
            Self::RejectedPermanently { .. } => OutcomeKind::RejectedPermanently,
            Self::RetryableFailure { .. } => OutcomeKind::RetryableFailure,
            Self::Cancelled => OutcomeKind::Cancelled,
        }
    }

    /// Side effect this outcome implies for the event source.
    pub fn disposition(&self) -> Disposition {
        self.kind().disposition()
    }

    /// Error detail, if the outcome carries one.
    pub fn error(&self) -> Option<&DeliveryError> {
        match self {
            Self::RejectedPermanently { reason } => Some(reason),
            Self::RetryableFailure { error, .. } => Some(error),
            Self::Delivered | Self::Cancelled => None,
        }
    }
}

/// Discriminant of [`DeliveryOutcome`], cheap to copy into stats and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// See [`DeliveryOutcome::Delivered`].
    Delivered,
    /// See [`DeliveryOutcome::RejectedPermanently`].
    RejectedPermanently,
    /// See [`DeliveryOutcome::RetryableFailure`].
    RetryableFailure,
    /// See [`DeliveryOutcome::Cancelled`].
    Cancelled,
}

impl OutcomeKind {
    /// Side effect this outcome implies for the event source.
    pub fn disposition(self) -> Disposition {
        match self {
            Self::Delivered | Self::RejectedPermanently => Disposition::Delete,
            Self::RetryableFailure => Disposition::Store,
            Self::Cancelled => Disposition::Retain,
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::RejectedPermanently => write!(f, "rejected_permanently"),
            Self::RetryableFailure => write!(f, "retryable_failure"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The single side effect an execution performs on its event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Remove the source.
    Delete,
    /// Persist the payload into the retry directory.
    Store,
    /// Leave the source exactly as it was.
    Retain,
}
