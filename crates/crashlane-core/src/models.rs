//! Event records and strongly-typed identities.
//!
//! An [`EventRecord`] is the in-memory form of one captured crash or error
//! report waiting to be delivered. Records are produced by the capture
//! subsystem, read by an upload operation, and dropped once that operation
//! reaches a terminal outcome.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{LoadError, Result};

/// Serialized event body: a JSON object keyed by field name.
pub type Payload = Map<String, Value>;

/// Stable identity of an event.
///
/// Used both for log correlation and to derive the file name a payload is
/// persisted under, so two distinct events must never share a key.
///
/// # Example
///
/// ```
/// use crashlane_core::EventKey;
///
/// let key = EventKey::new("crash-123");
/// assert_eq!(key.file_name(), "crash-123.json");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKey(String);

impl EventKey {
    /// Wraps an existing identity.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Creates a fresh random key for events that only exist in memory.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Derives the key of an on-disk event from its file stem.
    ///
    /// Stems written by [`EventKey::file_name`] decode back to the key they
    /// were derived from. Falls back to the full path when the path has no
    /// usable stem.
    pub fn from_path(path: &Path) -> Self {
        match path.file_stem() {
            Some(stem) if !stem.is_empty() => {
                let stem = stem.to_string_lossy();
                match urlencoding::decode(&stem) {
                    Ok(decoded) => Self(decoded.into_owned()),
                    Err(_) => Self(stem.into_owned()),
                }
            },
            _ => Self(path.display().to_string()),
        }
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe encoding of the key, distinct for distinct keys.
    ///
    /// Everything outside `[A-Za-z0-9_~-]` is percent-encoded, dots
    /// included, so the result never contains a separator and never starts
    /// with a dot. The empty key encodes as a lone `%`, which no other key
    /// can produce.
    pub fn encoded(&self) -> String {
        if self.0.is_empty() {
            return "%".to_string();
        }
        urlencoding::encode(&self.0).replace('.', "%2E")
    }

    /// File name this event's payload is stored under in a retry directory.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.encoded())
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for EventKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Where an event record was materialized from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventOrigin {
    /// Held in process memory only; nothing to delete on completion.
    InMemory,
    /// Backed by a file that must be removed once the event is resolved.
    OnDisk {
        /// Location of the backing file
        path: PathBuf,
    },
}

impl EventOrigin {
    /// Returns true if a durable source backs the event.
    pub fn is_on_disk(&self) -> bool {
        matches!(self, Self::OnDisk { .. })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::InMemory => None,
            Self::OnDisk { path } => Some(path),
        }
    }
}

impl fmt::Display for EventOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory => write!(f, "in_memory"),
            Self::OnDisk { .. } => write!(f, "on_disk"),
        }
    }
}

/// One event pending delivery.
///
/// Fields are private and there is no mutable accessor: once loaded, the
/// payload stays exactly as it was read for the whole upload attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    key: EventKey,
    payload: Payload,
    origin: EventOrigin,
}

impl EventRecord {
    /// Creates a record from an already-parsed payload.
    pub fn new(key: EventKey, payload: Payload, origin: EventOrigin) -> Self {
        Self { key, payload, origin }
    }

    /// Parses a record from serialized JSON.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Corrupt`] if the bytes are not valid JSON or the
    /// top-level value is not an object.
    pub fn from_slice(key: EventKey, origin: EventOrigin, bytes: &[u8]) -> Result<Self> {
        match serde_json::from_slice::<Value>(bytes)? {
            Value::Object(payload) => Ok(Self { key, payload, origin }),
            other => Err(LoadError::corrupt(format!(
                "expected a JSON object, found {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Event identity.
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// Serialized event body.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Where the record came from.
    pub fn origin(&self) -> &EventOrigin {
        &self.origin
    }

    /// Consumes the record, returning its payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Class of the first reported error (`exceptions[0].errorClass`).
    pub fn error_class(&self) -> Option<&str> {
        self.payload
            .get("exceptions")?
            .as_array()?
            .first()?
            .get("errorClass")?
            .as_str()
    }

    /// Release stage recorded with the event (`app.releaseStage`).
    pub fn release_stage(&self) -> Option<&str> {
        self.payload.get("app")?.get("releaseStage")?.as_str()
    }

    /// Per-event API key override (`apiKey`).
    pub fn api_key(&self) -> Option<&str> {
        self.payload.get("apiKey")?.as_str().filter(|key| !key.is_empty())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
