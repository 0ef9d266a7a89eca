//! Capabilities an upload operation borrows from its driver.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crashlane_core::EventKey;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{client::ApiClient, configuration::Configuration, notifier::Notifier};

/// Shared, read-only capability bundle for upload operations.
///
/// A host is owned by the driver and referenced weakly by every operation
/// it creates. All accessors are read-only; the one notification may be
/// delivered concurrently by many operations, so implementations guard
/// their own bookkeeping.
pub trait OperationHost: Send + Sync {
    /// Client used for every upload.
    fn api_client(&self) -> &dyn ApiClient;

    /// Configuration snapshot: eligibility policy and retry directory.
    fn configuration(&self) -> &Configuration;

    /// Notifier identity attached to outbound requests.
    fn notifier(&self) -> &Notifier;

    /// Called once per operation whose payload was persisted for retry.
    fn did_store_event_payload(&self, key: &EventKey);
}

/// Stock [`OperationHost`] used by the driver.
///
/// Counts stored payloads and optionally forwards their keys so the driver
/// can schedule a later pass.
pub struct DeliveryHost {
    client: Arc<dyn ApiClient>,
    configuration: Arc<Configuration>,
    notifier: Notifier,
    stored: AtomicU64,
    listener: Option<mpsc::UnboundedSender<EventKey>>,
}

impl DeliveryHost {
    /// Creates a host without a stored-payload listener.
    pub fn new(
        client: Arc<dyn ApiClient>,
        configuration: Arc<Configuration>,
        notifier: Notifier,
    ) -> Self {
        Self { client, configuration, notifier, stored: AtomicU64::new(0), listener: None }
    }

    /// Forwards every stored key to `listener`.
    #[must_use]
    pub fn with_listener(mut self, listener: mpsc::UnboundedSender<EventKey>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Number of payloads stored for retry so far.
    pub fn stored_count(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }
}

impl OperationHost for DeliveryHost {
    fn api_client(&self) -> &dyn ApiClient {
        self.client.as_ref()
    }

    fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn did_store_event_payload(&self, key: &EventKey) {
        let stored = self.stored.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(event_key = %key, stored, "payload stored for retry");

        if let Some(listener) = &self.listener {
            // Receiver gone means nobody is scheduling retries any more.
            let _ = listener.send(key.clone());
        }
    }
}

impl std::fmt::Debug for DeliveryHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHost")
            .field("configuration", &self.configuration)
            .field("notifier", &self.notifier)
            .field("stored", &self.stored_count())
            .finish_non_exhaustive()
    }
}
