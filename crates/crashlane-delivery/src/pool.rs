//! Bounded execution pool for upload operations.
//!
//! Provides lifecycle management, outcome statistics, and graceful shutdown
//! for supervised upload operation tasks.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use crashlane_core::EventKey;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{RwLock, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    operation::{Canceller, UploadOperation},
    outcome::{DeliveryOutcome, OutcomeKind},
};

/// Pool sizing and shutdown behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of operations executing at the same time.
    pub max_concurrent: usize,
    /// Default time allowed for outstanding operations on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: crate::DEFAULT_MAX_CONCURRENT,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Running totals of submitted operations by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Operations accepted by [`OperationPool::submit`].
    pub submitted: u64,
    /// Operations currently executing.
    pub in_flight: u64,
    /// Operations that delivered their event.
    pub delivered: u64,
    /// Operations that dropped their event for good.
    pub rejected: u64,
    /// Operations that handed their payload to the retry store.
    pub retryable: u64,
    /// Operations that ended without side effects.
    pub cancelled: u64,
    /// Operations that never signalled completion.
    pub panicked: u64,
}

impl PoolStats {
    /// Number of operations that reached any terminal state.
    pub fn finished(&self) -> u64 {
        self.delivered + self.rejected + self.retryable + self.cancelled + self.panicked
    }

    fn record(&mut self, outcome: &Result<DeliveryOutcome>) {
        match outcome.as_ref().map(DeliveryOutcome::kind) {
            Ok(OutcomeKind::Delivered) => self.delivered += 1,
            Ok(OutcomeKind::RejectedPermanently) => self.rejected += 1,
            Ok(OutcomeKind::RetryableFailure) => self.retryable += 1,
            Ok(OutcomeKind::Cancelled) => self.cancelled += 1,
            Err(_) => self.panicked += 1,
        }
    }
}

/// Handle to an operation that was moved into the pool.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    key: EventKey,
    canceller: Canceller,
}

impl OperationHandle {
    /// Event the operation delivers.
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// Cancels the operation.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }
}

/// Pool that runs upload operations with bounded concurrency.
///
/// Every submitted operation is supervised by its own task, which waits for
/// a concurrency slot, runs the operation on a separate task, and frees the
/// slot when the operation's completion signal fires. A panicking operation
/// only costs its own slot.
pub struct OperationPool {
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    stats: Arc<RwLock<PoolStats>>,
    cancellation_token: CancellationToken,
    handles: VecDeque<JoinHandle<()>>,
}

impl OperationPool {
    /// Creates an empty pool.
    pub fn new(config: PoolConfig) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            stats: Arc::new(RwLock::new(PoolStats::default())),
            cancellation_token: CancellationToken::new(),
            handles: VecDeque::new(),
        }
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Token cancelled when the pool shuts down.
    ///
    /// Build operations with it through
    /// [`UploadOperation::with_cancellation`] to tie them to the pool.
    pub fn child_token(&self) -> CancellationToken {
        self.cancellation_token.child_token()
    }

    /// Queues `operation` for execution and returns immediately.
    pub async fn submit(&mut self, mut operation: UploadOperation) -> OperationHandle {
        let key = operation.key().clone();
        let canceller = operation.canceller();
        let handle = OperationHandle { key: key.clone(), canceller: canceller.clone() };

        self.stats.write().await.submitted += 1;

        let semaphore = self.semaphore.clone();
        let stats = self.stats.clone();
        let pool_token = self.cancellation_token.clone();

        let supervisor = tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            if pool_token.is_cancelled() {
                canceller.cancel();
            }
            stats.write().await.in_flight += 1;

            let completion = operation.completion();
            let task = tokio::spawn(operation.execute());
            let finished = async move {
                match completion {
                    Some(completion) => completion.wait().await,
                    None => task.await.map_err(|e| {
                        DeliveryError::internal(format!("operation task failed: {e}"))
                    }),
                }
            };
            tokio::pin!(finished);

            let result = tokio::select! {
                result = &mut finished => result,
                () = pool_token.cancelled() => {
                    canceller.cancel();
                    finished.await
                },
            };
            drop(permit);

            match &result {
                Ok(outcome) => debug!(event_key = %key, outcome = %outcome.kind(), "operation completed"),
                Err(e) => error!(event_key = %key, error = %e, "operation panicked"),
            }

            let mut stats = stats.write().await;
            stats.in_flight = stats.in_flight.saturating_sub(1);
            stats.record(&result);
        });

        self.handles.retain(|h| !h.is_finished());
        self.handles.push_back(supervisor);
        handle
    }

    /// Cancels every queued and in-flight operation without waiting.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    /// Waits for every submitted operation to finish without cancelling.
    ///
    /// Safe to abandon midway: operations not yet awaited stay tracked.
    pub async fn drain(&mut self) {
        while let Some(supervisor) = self.handles.front_mut() {
            let result = supervisor.await;
            self.handles.pop_front();
            if let Err(join_error) = result {
                error!(error = %join_error, "operation supervisor failed");
            }
        }
    }

    /// Cancels outstanding operations and waits for them to wind down.
    ///
    /// Operations that already have a response keep it; operations still
    /// queued or in flight finish as cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if operations are still running after
    /// `timeout`.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            operation_count = self.handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful pool shutdown"
        );

        self.cancellation_token.cancel();

        match tokio::time::timeout(timeout, self.drain()).await {
            Ok(()) => {
                info!("operation pool shutdown completed");
                Ok(())
            },
            Err(_timeout) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "pool shutdown timed out, some operations may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Snapshot of the outcome statistics.
    pub async fn stats(&self) -> PoolStats {
        self.stats.read().await.clone()
    }

    /// Check if any operations are still running.
    pub fn has_active_operations(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for OperationPool {
    fn drop(&mut self) {
        let active_count = self.handles.iter().filter(|h| !h.is_finished()).count();

        if active_count > 0 && !self.cancellation_token.is_cancelled() {
            error!(
                active_operations = active_count,
                "OperationPool dropped with {} active operations, cancelling them", active_count
            );

            self.cancellation_token.cancel();

            warn!("OperationPool was not shut down gracefully. Call drain() or shutdown_graceful() before dropping.");
        }
    }
}
