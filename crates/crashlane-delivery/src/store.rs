//! Filesystem retry store.
//!
//! One `<encoded-key>.json` file per retryable event, placed directly in the
//! configured directory. Payloads are written to a uniquely named temporary
//! sibling and then hard-linked under their final name, which fails instead
//! of replacing a payload that is already there. A process killed mid-write
//! leaves at most a temporary file, which a later listing removes.

use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use crashlane_core::{EventKey, Payload};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{DeliveryError, Result},
    source::FileBackedEvent,
};

const PAYLOAD_EXTENSION: &str = "json";
const TEMP_SUFFIX: &str = ".tmp";

/// Temporary files older than this belong to a write that never finished.
const STALE_TEMP_AGE: Duration = Duration::from_secs(300);

/// Upper bound on alternative names tried for one key.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Directory of payloads awaiting another delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryStore {
    directory: PathBuf,
}

impl RetryStore {
    /// Creates a store rooted at `directory`. Nothing is touched on disk
    /// until the first write.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    /// Root directory of the store.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Preferred path for the payload of `key`.
    pub fn path_for(&self, key: &EventKey) -> PathBuf {
        self.directory.join(key.file_name())
    }

    /// Returns true if `path` sits directly inside this store's directory.
    pub fn holds(&self, path: &Path) -> bool {
        let Some(parent) = path.parent() else { return false };
        if parent == self.directory {
            return true;
        }
        match (parent.canonicalize(), self.directory.canonicalize()) {
            (Ok(parent), Ok(directory)) => parent == directory,
            _ => false,
        }
    }

    /// Persists `payload` for `key` without touching any stored payload.
    ///
    /// The payload lands at [`path_for`](Self::path_for) when that name is
    /// free. Otherwise `<encoded-key>+<n>.json` is used with the lowest free
    /// `n`; `+` never occurs in an encoded key, so the alternative names
    /// cannot collide with another key's preferred name.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the payload cannot be encoded and
    /// `StorageError` if the directory or file cannot be written.
    pub async fn write(&self, key: &EventKey, payload: &Payload) -> Result<PathBuf> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| DeliveryError::serialization(format!("failed to encode payload: {e}")))?;

        tokio::fs::create_dir_all(&self.directory).await.map_err(|e| {
            DeliveryError::storage(format!(
                "failed to create retry directory {}: {e}",
                self.directory.display()
            ))
        })?;

        let temp_path =
            self.directory.join(format!("{}.{}{TEMP_SUFFIX}", key.file_name(), Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&temp_path, &bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(DeliveryError::storage(format!(
                "failed to write {}: {e}",
                temp_path.display()
            )));
        }

        let linked = self.link_free_name(key, &temp_path).await;
        if let Err(e) = tokio::fs::remove_file(&temp_path).await {
            warn!(path = %temp_path.display(), error = %e, "failed to remove temporary payload");
        }
        let path = linked?;

        debug!(event_key = %key, path = %path.display(), bytes = bytes.len(), "payload stored for retry");
        Ok(path)
    }

    async fn link_free_name(&self, key: &EventKey, temp_path: &Path) -> Result<PathBuf> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = match attempt {
                0 => self.path_for(key),
                n => self.directory.join(format!("{}+{n}.{PAYLOAD_EXTENSION}", key.encoded())),
            };
            match tokio::fs::hard_link(temp_path, &path).await {
                Ok(()) => return Ok(path),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(event_key = %key, path = %path.display(), "stored payload name taken");
                },
                Err(e) => {
                    return Err(DeliveryError::storage(format!(
                        "failed to move payload into {}: {e}",
                        path.display()
                    )));
                },
            }
        }

        Err(DeliveryError::storage(format!(
            "no free file name for event {key} in {}",
            self.directory.display()
        )))
    }

    /// Lists stored payloads as file-backed event sources, ordered by name.
    ///
    /// A missing directory is an empty store. Temporary files are never
    /// listed; those left behind by a write that did not finish are removed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the directory exists but cannot be read.
    pub async fn pending(&self) -> Result<Vec<FileBackedEvent>> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_error(&self.directory, &e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) =
            entries.next_entry().await.map_err(|e| read_error(&self.directory, &e))?
        {
            let Ok(metadata) = entry.metadata().await else { continue };
            if !metadata.is_file() {
                continue;
            }

            let path = entry.path();
            if entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX) {
                if is_stale(&metadata) {
                    remove_stale_temp(&path).await;
                }
            } else if path.extension().is_some_and(|ext| ext == PAYLOAD_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        Ok(paths.into_iter().map(FileBackedEvent::new).collect())
    }
}

fn is_stale(metadata: &std::fs::Metadata) -> bool {
    metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= STALE_TEMP_AGE)
}

async fn remove_stale_temp(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed abandoned temporary payload"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove abandoned temporary payload"),
    }
}

fn read_error(directory: &Path, error: &io::Error) -> DeliveryError {
    DeliveryError::storage(format!("failed to read retry directory {}: {error}", directory.display()))
}
