//! Error types for materializing event records.
//!
//! Every variant describes a record that cannot be turned into something
//! uploadable. None of them are retryable: a source that is missing or
//! corrupt now will still be missing or corrupt on the next pass.

use std::{io, path::Path};

use thiserror::Error;

/// Result type alias using `LoadError`.
pub type Result<T> = std::result::Result<T, LoadError>;

/// Failure to load an event record from its source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The source no longer exists.
    #[error("event source missing: {path}")]
    Missing {
        /// Location that was expected to hold the event
        path: String,
    },

    /// The source exists but could not be read.
    #[error("event source unreadable: {message}")]
    Unreadable {
        /// Underlying I/O failure
        message: String,
    },

    /// The source was read but does not hold a valid event payload.
    #[error("event payload corrupt: {message}")]
    Corrupt {
        /// Parse or shape failure
        message: String,
    },
}

impl LoadError {
    /// Maps an I/O failure on `path` into a load error.
    ///
    /// `NotFound` becomes [`LoadError::Missing`]; everything else is
    /// reported as unreadable.
    pub fn from_io(path: &Path, error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::Missing { path: path.display().to_string() },
            _ => Self::Unreadable { message: format!("{}: {error}", path.display()) },
        }
    }

    /// Creates a corrupt-payload error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt { message: message.into() }
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> Self {
        Self::corrupt(err.to_string())
    }
}
