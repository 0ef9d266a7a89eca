//! Per-event upload operation.
//!
//! An [`UploadOperation`] owns the full lifecycle of one event: load it,
//! check eligibility, upload it, and resolve the result into exactly one
//! terminal action on its source (delete, store for retry, or nothing).
//! Errors never escape an operation; the pool only observes the
//! [`DeliveryOutcome`] delivered through the completion signal.

use std::sync::{Arc, Weak};

use crashlane_core::{EventKey, Payload};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    client::{UploadRequest, UploadResponse},
    error::{DeliveryError, ErrorCategory, Result},
    host::OperationHost,
    outcome::{self, Classification, DeliveryOutcome},
    source::EventSource,
};

/// One event's delivery attempt.
///
/// Executed at most once: [`execute`](Self::execute) consumes the operation.
/// Cancellation may be requested at any time from any thread through
/// [`cancel`](Self::cancel) or a [`Canceller`].
#[derive(Debug)]
pub struct UploadOperation {
    source: EventSource,
    host: Weak<dyn OperationHost>,
    cancellation: CancellationToken,
    completion: Option<oneshot::Sender<DeliveryOutcome>>,
    receiver: Option<oneshot::Receiver<DeliveryOutcome>>,
}

impl UploadOperation {
    /// Creates an operation for `source`, holding `host` weakly.
    pub fn new<H>(source: impl Into<EventSource>, host: &Arc<H>) -> Self
    where
        H: OperationHost + 'static,
    {
        Self::with_cancellation(source, host, CancellationToken::new())
    }

    /// Creates an operation driven by an existing cancellation token, e.g.
    /// one handed out by [`OperationPool::child_token`](crate::OperationPool::child_token).
    pub fn with_cancellation<H>(
        source: impl Into<EventSource>,
        host: &Arc<H>,
        cancellation: CancellationToken,
    ) -> Self
    where
        H: OperationHost + 'static,
    {
        let host: Weak<H> = Arc::downgrade(host);
        let host: Weak<dyn OperationHost> = host;
        let (sender, receiver) = oneshot::channel();
        Self {
            source: source.into(),
            host,
            cancellation,
            completion: Some(sender),
            receiver: Some(receiver),
        }
    }

    /// Identity of the event this operation delivers.
    pub fn key(&self) -> &EventKey {
        self.source.key()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Handle that can cancel this operation after it was moved into a pool.
    pub fn canceller(&self) -> Canceller {
        Canceller { token: self.cancellation.clone() }
    }

    /// Takes the completion signal. Returns `None` on the second call.
    pub fn completion(&mut self) -> Option<Completion> {
        self.receiver.take().map(|receiver| Completion { receiver })
    }

    /// Runs the operation to its terminal outcome.
    ///
    /// The completion signal fires exactly once with the returned outcome.
    pub async fn execute(mut self) -> DeliveryOutcome {
        let span = info_span!(
            "upload_operation",
            event_key = %self.source.key(),
            origin = self.source.kind()
        );
        let completion = self.completion.take();

        let outcome = self.run().instrument(span.clone()).await;

        span.in_scope(|| match outcome.error() {
            Some(error) => info!(
                outcome = %outcome.kind(),
                error_category = %ErrorCategory::from(error),
                error = %error,
                "upload operation finished"
            ),
            None => info!(outcome = %outcome.kind(), "upload operation finished"),
        });

        if let Some(sender) = completion {
            // Receiver is gone when the caller never took the completion.
            let _ = sender.send(outcome.clone());
        }
        outcome
    }

    async fn run(&self) -> DeliveryOutcome {
        if self.cancellation.is_cancelled() {
            debug!("cancelled before start");
            return DeliveryOutcome::Cancelled;
        }

        let Some(host) = self.host.upgrade() else {
            warn!("operation host dropped before execution, leaving event untouched");
            return DeliveryOutcome::Cancelled;
        };

        let event = match self.source.load().await {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "event could not be loaded, discarding");
                return self.reject(DeliveryError::Load(e)).await;
            },
        };

        if let Err(reason) = host.configuration().should_send(&event) {
            info!(reason = %reason, "event not eligible for delivery, discarding");
            return self.reject(DeliveryError::ineligible(reason)).await;
        }

        let request = match UploadRequest::for_event(&event, host.configuration(), host.notifier())
        {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "event could not be encoded, discarding");
                return self.reject(e).await;
            },
        };

        if self.cancellation.is_cancelled() {
            debug!("cancelled before upload");
            return DeliveryOutcome::Cancelled;
        }

        // Upload is polled first: a response that already arrived must not be
        // dropped in favour of a cancel.
        let result = tokio::select! {
            biased;
            result = host.api_client().upload(request) => result,
            () = self.cancellation.cancelled() => {
                info!("cancelled while upload was in flight");
                return DeliveryOutcome::Cancelled;
            },
        };

        match outcome::classify(&result) {
            Classification::Delivered => {
                if let Ok(response) = &result {
                    debug!(
                        status_code = response.status_code,
                        duration_ms = response.duration.as_millis(),
                        "event delivered"
                    );
                }
                self.delete_source().await;
                DeliveryOutcome::Delivered
            },
            Classification::Permanent => self.reject(failure(result)).await,
            Classification::Retryable => {
                self.retain_for_retry(host.as_ref(), failure(result), event.into_payload()).await
            },
        }
    }

    async fn reject(&self, reason: DeliveryError) -> DeliveryOutcome {
        self.delete_source().await;
        DeliveryOutcome::RejectedPermanently { reason }
    }

    async fn delete_source(&self) {
        if let Err(e) = self.source.delete().await {
            error!(error = %e, "failed to delete event source");
        }
    }

    async fn retain_for_retry(
        &self,
        host: &dyn OperationHost,
        error: DeliveryError,
        payload: Payload,
    ) -> DeliveryOutcome {
        let directory = host.configuration().retry_directory();
        warn!(
            error = %error,
            retry_after_seconds = error.retry_after_seconds(),
            "transient delivery failure, storing payload for retry"
        );

        match self.source.store_payload(&payload, directory).await {
            Ok(path) => {
                if let Some(path) = path {
                    debug!(path = %path.display(), "payload persisted");
                }
                host.did_store_event_payload(self.source.key());
            },
            Err(e) => {
                error!(error = %e, directory = %directory.display(), "failed to store payload for retry");
            },
        }

        DeliveryOutcome::RetryableFailure { error, payload }
    }
}

/// Turns a non-delivered upload result into the error it represents.
fn failure(result: Result<UploadResponse>) -> DeliveryError {
    match result {
        Ok(response) => DeliveryError::from_response(&response),
        Err(error) => error,
    }
}

/// Cloneable handle that cancels one operation.
#[derive(Debug, Clone)]
pub struct Canceller {
    token: CancellationToken,
}

impl Canceller {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// One-shot completion signal of an operation.
#[derive(Debug)]
pub struct Completion {
    receiver: oneshot::Receiver<DeliveryOutcome>,
}

impl Completion {
    /// Waits for the operation to finish.
    ///
    /// # Errors
    ///
    /// Returns `InternalError` if the operation was dropped or panicked
    /// before it could signal an outcome.
    pub async fn wait(self) -> Result<DeliveryOutcome> {
        self.receiver.await.map_err(|_| {
            DeliveryError::internal("operation ended without signalling completion")
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{future::Future, pin::Pin};

    use serde_json::json;

    use super::*;
    use crate::{
        client::ApiClient, configuration::Configuration, notifier::Notifier,
        outcome::OutcomeKind, source::InMemoryEvent,
    };

    struct OkClient;

    impl ApiClient for OkClient {
        fn upload(
            &self,
            _request: UploadRequest,
        ) -> Pin<Box<dyn Future<Output = Result<UploadResponse>> + Send + '_>> {
            Box::pin(async {
                Ok(UploadResponse {
                    status_code: 200,
                    headers: Default::default(),
                    body: String::new(),
                    duration: std::time::Duration::ZERO,
                })
            })
        }
    }

    struct StaticHost {
        client: OkClient,
        configuration: Configuration,
        notifier: Notifier,
    }

    impl OperationHost for StaticHost {
        fn api_client(&self) -> &dyn ApiClient {
            &self.client
        }

        fn configuration(&self) -> &Configuration {
            &self.configuration
        }

        fn notifier(&self) -> &Notifier {
            &self.notifier
        }

        fn did_store_event_payload(&self, _key: &EventKey) {}
    }

    fn host() -> Arc<StaticHost> {
        Arc::new(StaticHost {
            client: OkClient,
            configuration: Configuration::builder("key", "https://x", "/tmp/crashlane")
                .build()
                .unwrap(),
            notifier: Notifier::default(),
        })
    }

    fn source() -> InMemoryEvent {
        let serde_json::Value::Object(payload) = json!({ "context": "main" }) else {
            unreachable!("fixture must be an object")
        };
        InMemoryEvent::with_key(EventKey::new("mem-1"), payload)
    }

    #[test]
    fn concrete_host_is_held_weakly() {
        let host = host();

        let operation = UploadOperation::with_cancellation(source(), &host, CancellationToken::new());

        assert_eq!(Arc::strong_count(&host), 1);
        assert_eq!(Arc::weak_count(&host), 1);
        drop(operation);
        assert_eq!(Arc::weak_count(&host), 0);
    }

    #[tokio::test]
    async fn completion_signals_the_returned_outcome() {
        let host = host();
        let mut operation = UploadOperation::new(source(), &host);
        let completion = operation.completion().unwrap();
        assert!(operation.completion().is_none());

        let outcome = operation.execute().await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(completion.wait().await.unwrap(), DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn canceller_reaches_operation() {
        let host = host();
        let operation = UploadOperation::new(source(), &host);
        let canceller = operation.canceller();

        canceller.cancel();

        assert!(operation.is_cancelled());
        assert_eq!(operation.execute().await.kind(), OutcomeKind::Cancelled);
    }

    #[tokio::test]
    async fn dropped_host_yields_cancelled() {
        let host = host();
        let mut operation = UploadOperation::new(source(), &host);
        let completion = operation.completion().unwrap();
        drop(host);

        assert_eq!(operation.execute().await, DeliveryOutcome::Cancelled);
        assert_eq!(completion.wait().await.unwrap(), DeliveryOutcome::Cancelled);
    }

    #[tokio::test]
    async fn dropped_operation_fails_completion() {
        let host = host();
        let mut operation = UploadOperation::new(source(), &host);
        let completion = operation.completion().unwrap();
        drop(operation);

        assert!(matches!(completion.wait().await, Err(DeliveryError::InternalError { .. })));
    }
}
