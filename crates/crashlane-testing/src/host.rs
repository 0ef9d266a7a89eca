//! Operation host that records lifecycle notifications.

use std::sync::{Arc, Mutex, PoisonError};

use crashlane_core::EventKey;
use crashlane_delivery::{ApiClient, Configuration, Notifier, OperationHost};

use crate::api::ScriptedApiClient;

/// [`OperationHost`] backed by a [`ScriptedApiClient`].
#[derive(Debug)]
pub struct RecordingHost {
    client: Arc<ScriptedApiClient>,
    configuration: Configuration,
    notifier: Notifier,
    stored: Mutex<Vec<EventKey>>,
}

impl RecordingHost {
    /// Creates a host sharing `client` with the test.
    pub fn new(client: Arc<ScriptedApiClient>, configuration: Configuration) -> Arc<Self> {
        Arc::new(Self {
            client,
            configuration,
            notifier: Notifier::new("crashlane-testing", "0.0.0", "https://collector.test"),
            stored: Mutex::new(Vec::new()),
        })
    }

    /// Scripted client used for uploads.
    pub fn client(&self) -> &ScriptedApiClient {
        &self.client
    }

    /// Keys passed to `did_store_event_payload`, in call order.
    pub fn stored_keys(&self) -> Vec<EventKey> {
        self.stored.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of stored-payload notifications received.
    pub fn store_notifications(&self) -> usize {
        self.stored.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl OperationHost for RecordingHost {
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
        self.stored.lock().unwrap_or_else(PoisonError::into_inner).push(key.clone());
    }
}
