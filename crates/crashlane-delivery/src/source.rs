//! Event sources an upload operation can draw from.
//!
//! Every source supports the same three capabilities: load the event,
//! delete its durable backing, and persist its payload for a later retry.
//! What each capability means depends on where the event lives.

use std::{
    io,
    path::{Path, PathBuf},
};

use crashlane_core::{EventKey, EventOrigin, EventRecord, LoadError, Payload};
use tracing::debug;

use crate::{
    error::{DeliveryError, Result},
    store::RetryStore,
};

/// An event held only in process memory, typically one captured during the
/// current session.
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryEvent {
    key: EventKey,
    payload: Payload,
}

impl InMemoryEvent {
    /// Wraps a payload under a freshly generated key.
    pub fn new(payload: Payload) -> Self {
        Self::with_key(EventKey::generate(), payload)
    }

    /// Wraps a payload under an explicit key.
    pub fn with_key(key: EventKey, payload: Payload) -> Self {
        Self { key, payload }
    }
}

/// An event serialized to a JSON file, either by the capture subsystem or by
/// a previous retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBackedEvent {
    key: EventKey,
    path: PathBuf,
}

impl FileBackedEvent {
    /// Creates a source for `path`, keyed by the file stem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { key: EventKey::from_path(&path), path }
    }

    /// Event identity.
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> std::result::Result<EventRecord, LoadError> {
        let bytes =
            tokio::fs::read(&self.path).await.map_err(|e| LoadError::from_io(&self.path, &e))?;
        let origin = EventOrigin::OnDisk { path: self.path.clone() };
        EventRecord::from_slice(self.key.clone(), origin, &bytes)
    }

    async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "event file removed");
                Ok(())
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeliveryError::storage(format!(
                "failed to remove {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn store_payload(&self, payload: &Payload, store: &RetryStore) -> Result<Option<PathBuf>> {
        if store.holds(&self.path) {
            debug!(path = %self.path.display(), "event already persisted in retry directory");
            return Ok(None);
        }

        // The capture file must not outlive the stored copy.
        let stored = store.write(&self.key, payload).await?;
        if let Err(e) = self.delete().await {
            tracing::warn!(error = %e, "payload stored but capture file was not removed");
        }
        Ok(Some(stored))
    }
}

/// Where an operation's event comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum EventSource {
    /// See [`InMemoryEvent`].
    InMemory(InMemoryEvent),
    /// See [`FileBackedEvent`].
    FileBacked(FileBackedEvent),
}

impl EventSource {
    /// Identity of the event behind this source.
    pub fn key(&self) -> &EventKey {
        match self {
            Self::InMemory(event) => &event.key,
            Self::FileBacked(event) => &event.key,
        }
    }

    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InMemory(_) => "in_memory",
            Self::FileBacked(_) => "file_backed",
        }
    }

    /// Materializes the event.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if the backing file is missing, unreadable or
    /// does not contain a JSON object.
    pub async fn load(&self) -> std::result::Result<EventRecord, LoadError> {
        match self {
            Self::InMemory(event) => Ok(EventRecord::new(
                event.key.clone(),
                event.payload.clone(),
                EventOrigin::InMemory,
            )),
            Self::FileBacked(event) => event.load().await,
        }
    }

    /// Removes the durable backing of the event, if there is one.
    ///
    /// Idempotent: a file that is already gone is not an error, and
    /// in-memory events have nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the file exists but cannot be removed.
    pub async fn delete(&self) -> Result<()> {
        match self {
            Self::InMemory(_) => {},
            Self::FileBacked(event) => event.delete().await?,
        }
        debug!(event_key = %self.key(), source = self.kind(), "event source deleted");
        Ok(())
    }

    /// Persists `payload` into `directory` so a later pass can retry it.
    ///
    /// Returns the path written, or `None` when the event already lives in
    /// that directory and nothing had to be written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` or `Serialization` if the payload could not be
    /// written.
    pub async fn store_payload(&self, payload: &Payload, directory: &Path) -> Result<Option<PathBuf>> {
        let store = RetryStore::new(directory);
        match self {
            Self::InMemory(event) => store.write(&event.key, payload).await.map(Some),
            Self::FileBacked(event) => event.store_payload(payload, &store).await,
        }
    }
}

impl From<InMemoryEvent> for EventSource {
    fn from(event: InMemoryEvent) -> Self {
        Self::InMemory(event)
    }
}

impl From<FileBackedEvent> for EventSource {
    fn from(event: FileBackedEvent) -> Self {
        Self::FileBacked(event)
    }
}
