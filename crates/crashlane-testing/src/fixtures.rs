//! Event fixture builders.
//!
//! Payloads follow the event schema the eligibility policy reads: the first
//! entry of `exceptions` carries the error class, `app.releaseStage` the
//! release stage, and a top-level `apiKey` overrides the configured key.

use std::path::Path;

use anyhow::{Context, Result};
use crashlane_core::{EventKey, Payload};
use crashlane_delivery::{FileBackedEvent, InMemoryEvent};
use serde_json::{json, Value};

/// Builder for test event payloads.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    key: EventKey,
    payload: Payload,
}

impl EventBuilder {
    /// Creates a builder for a typical unhandled crash under `key`.
    pub fn new(key: impl Into<EventKey>) -> Self {
        let mut payload = Payload::new();
        payload.insert(
            "exceptions".to_string(),
            json!([{ "errorClass": "RuntimeError", "message": "something went wrong" }]),
        );
        payload.insert("severity".to_string(), json!("error"));
        payload.insert("unhandled".to_string(), json!(true));
        Self { key: key.into(), payload }
    }

    /// Sets the class of the first exception.
    #[must_use]
    pub fn error_class(mut self, error_class: &str) -> Self {
        self.payload.insert(
            "exceptions".to_string(),
            json!([{ "errorClass": error_class, "message": "something went wrong" }]),
        );
        self
    }

    /// Sets `app.releaseStage`.
    #[must_use]
    pub fn release_stage(mut self, release_stage: &str) -> Self {
        let app = self.payload.entry("app").or_insert_with(|| json!({}));
        if let Value::Object(app) = app {
            app.insert("releaseStage".to_string(), json!(release_stage));
        }
        self
    }

    /// Sets a per-event API key.
    #[must_use]
    pub fn api_key(self, api_key: &str) -> Self {
        self.field("apiKey", json!(api_key))
    }

    /// Sets an arbitrary top-level field.
    #[must_use]
    pub fn field(mut self, name: &str, value: Value) -> Self {
        self.payload.insert(name.to_string(), value);
        self
    }

    /// Key the event will be created under.
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// Returns the payload.
    pub fn payload(&self) -> Payload {
        self.payload.clone()
    }

    /// Builds an in-memory event.
    pub fn in_memory(self) -> InMemoryEvent {
        InMemoryEvent::with_key(self.key, self.payload)
    }

    /// Serializes the event into `<dir>/<key>.json` and returns a
    /// file-backed source for it.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub fn write_to(self, dir: &Path) -> Result<FileBackedEvent> {
        let path = dir.join(self.key.file_name());
        let bytes = serde_json::to_vec(&self.payload).context("failed to encode fixture")?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(FileBackedEvent::new(path))
    }
}

/// Reads a stored payload back as JSON.
///
/// # Errors
///
/// Returns error if the file is missing or not valid JSON.
pub fn read_payload(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("invalid JSON in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_policy_fields() {
        let payload = EventBuilder::new("crash-1")
            .error_class("SIGABRT")
            .release_stage("beta")
            .api_key("event-key")
            .payload();

        assert_eq!(payload["exceptions"][0]["errorClass"], "SIGABRT");
        assert_eq!(payload["app"]["releaseStage"], "beta");
        assert_eq!(payload["apiKey"], "event-key");
    }

    #[test]
    fn write_to_creates_keyed_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = EventBuilder::new("crash-123").write_to(dir.path()).unwrap();

        assert_eq!(source.path(), dir.path().join("crash-123.json"));
        assert_eq!(source.key().as_str(), "crash-123");
        assert_eq!(read_payload(source.path()).unwrap()["severity"], "error");
    }
}
