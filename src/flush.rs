//! One-shot flush of the retry directory.
//!
//! Every stored payload gets its own upload operation. Operations run
//! through a bounded pool; delivered and permanently rejected payloads are
//! removed, retryable ones stay in place for the next pass.

use std::sync::Arc;

use anyhow::{Context, Result};
use crashlane_core::{EventKey, RealClock};
use crashlane_delivery::{
    DeliveryError, DeliveryHost, HttpApiClient, OperationPool, PoolStats, RetryStore, UploadOperation,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;

/// Summary of a finished flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Payloads found in the retry directory.
    pub pending: usize,
    /// Outcome totals of the pool that ran them.
    pub stats: PoolStats,
    /// Events whose payload is kept for another attempt.
    pub retry_keys: Vec<EventKey>,
}

impl FlushReport {
    /// Returns true if nothing is left for a later pass.
    pub fn is_clean(&self) -> bool {
        self.retry_keys.is_empty() && self.stats.cancelled == 0 && self.stats.panicked == 0
    }
}

/// Uploads every payload stored in the configured retry directory.
///
/// Cancelling `shutdown` stops outstanding operations; their payloads are
/// left where they are.
///
/// # Errors
///
/// Returns error if the settings do not form a usable configuration, the
/// retry directory cannot be listed, or the pool does not wind down within
/// the shutdown timeout.
pub async fn flush(settings: &Settings, shutdown: CancellationToken) -> Result<FlushReport> {
    let configuration = Arc::new(settings.to_configuration()?);
    let client = HttpApiClient::new(settings.to_client_config(), Arc::new(RealClock::new()))
        .context("failed to create collector client")?;

    let (stored_tx, mut stored_rx) = mpsc::unbounded_channel();
    let host = Arc::new(
        DeliveryHost::new(Arc::new(client), configuration.clone(), settings.notifier())
            .with_listener(stored_tx),
    );

    let store = RetryStore::new(configuration.retry_directory());
    let pending = store.pending().await.context("failed to list stored payloads")?;
    info!(
        retry_directory = %store.directory().display(),
        pending = pending.len(),
        "flushing stored payloads"
    );

    let pool_config = settings.to_pool_config();
    let shutdown_timeout = pool_config.shutdown_timeout;
    let mut pool = OperationPool::new(pool_config);
    let count = pending.len();
    for source in pending {
        let operation = UploadOperation::with_cancellation(source, &host, pool.child_token());
        pool.submit(operation).await;
    }

    let interrupted = tokio::select! {
        biased;
        () = pool.drain() => false,
        () = shutdown.cancelled() => true,
    };

    if interrupted {
        warn!("shutdown requested, cancelling outstanding uploads");
        pool.cancel();
        tokio::time::timeout(shutdown_timeout, pool.drain()).await.map_err(|_| {
            DeliveryError::ShutdownTimeout { timeout: shutdown_timeout }
        })?;
    }

    let stats = pool.stats().await;
    let mut retry_keys = Vec::new();
    while let Ok(key) = stored_rx.try_recv() {
        retry_keys.push(key);
    }

    info!(
        delivered = stats.delivered,
        rejected = stats.rejected,
        retained = retry_keys.len(),
        cancelled = stats.cancelled,
        "flush finished"
    );

    Ok(FlushReport { pending: count, stats, retry_keys })
}
