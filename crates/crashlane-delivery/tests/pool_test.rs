//! Integration tests for the operation pool.

#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use crashlane_delivery::{FileBackedEvent, OperationPool, PoolConfig, UploadOperation};
use crashlane_testing::{test_configuration, EventBuilder, RecordingHost, Reply, ScriptedApiClient};

fn host(reply: Reply, retry_dir: &std::path::Path) -> Arc<RecordingHost> {
    RecordingHost::new(Arc::new(ScriptedApiClient::with_default(reply)), test_configuration(retry_dir))
}

fn pool(max_concurrent: usize) -> OperationPool {
    OperationPool::new(PoolConfig { max_concurrent, ..Default::default() })
}

async fn wait_for_uploads(host: &RecordingHost, count: usize) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while host.client().upload_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn concurrency_is_bounded() -> Result<()> {
    let retry_dir = tempfile::tempdir()?;
    let client = Arc::new(ScriptedApiClient::new().with_delay(Duration::from_millis(50)));
    let host = RecordingHost::new(client.clone(), test_configuration(retry_dir.path()));
    let mut pool = pool(2);

    for i in 0..8 {
        pool.submit(UploadOperation::new(EventBuilder::new(format!("crash-{i}")).in_memory(), &host))
            .await;
    }
    pool.drain().await;

    assert_eq!(client.upload_count(), 8);
    assert!(client.max_concurrent() <= 2, "saw {} concurrent uploads", client.max_concurrent());

    let stats = pool.stats().await;
    assert_eq!(stats.submitted, 8);
    assert_eq!(stats.delivered, 8);
    assert_eq!(stats.in_flight, 0);
    Ok(())
}

#[tokio::test]
async fn stats_count_each_outcome() -> Result<()> {
    let capture_dir = tempfile::tempdir()?;
    let retry_dir = tempfile::tempdir()?;
    let delivering = host(Reply::Status(200), retry_dir.path());
    let failing = host(Reply::Status(503), retry_dir.path());
    let mut pool = pool(4);

    pool.submit(UploadOperation::new(EventBuilder::new("ok-1").in_memory(), &delivering)).await;
    pool.submit(UploadOperation::new(EventBuilder::new("ok-2").in_memory(), &delivering)).await;
    pool.submit(UploadOperation::new(
        FileBackedEvent::new(capture_dir.path().join("missing.json")),
        &delivering,
    ))
    .await;
    pool.submit(UploadOperation::new(EventBuilder::new("retry-1").in_memory(), &failing)).await;
    let cancelled = UploadOperation::new(EventBuilder::new("cancel-1").in_memory(), &delivering);
    cancelled.cancel();
    pool.submit(cancelled).await;
    pool.drain().await;

    let stats = pool.stats().await;
    assert_eq!(stats.submitted, 5);
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.retryable, 1);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.finished(), 5);
    assert_eq!(failing.store_notifications(), 1);
    Ok(())
}

#[tokio::test]
async fn panicking_operation_does_not_affect_others() -> Result<()> {
    let retry_dir = tempfile::tempdir()?;
    let panicking = host(Reply::Panic, retry_dir.path());
    let delivering = host(Reply::Status(200), retry_dir.path());
    let mut pool = pool(1);

    pool.submit(UploadOperation::new(EventBuilder::new("boom").in_memory(), &panicking)).await;
    pool.submit(UploadOperation::new(EventBuilder::new("fine-1").in_memory(), &delivering)).await;
    pool.submit(UploadOperation::new(EventBuilder::new("fine-2").in_memory(), &delivering)).await;
    pool.drain().await;

    let stats = pool.stats().await;
    assert_eq!(stats.panicked, 1);
    assert_eq!(stats.delivered, 2);
    assert_eq!(delivering.client().upload_count(), 2);
    Ok(())
}

#[tokio::test]
async fn shutdown_cancels_outstanding_operations() -> Result<()> {
    let capture_dir = tempfile::tempdir()?;
    let retry_dir = tempfile::tempdir()?;
    let hanging = host(Reply::Hang, retry_dir.path());
    let mut pool = pool(2);

    let mut paths = Vec::new();
    for i in 0..3 {
        let source = EventBuilder::new(format!("crash-{i}")).write_to(capture_dir.path())?;
        paths.push(source.path().to_path_buf());
        pool.submit(UploadOperation::new(source, &hanging)).await;
    }
    wait_for_uploads(&hanging, 2).await?;
    assert!(pool.has_active_operations());

    let stats = pool.stats().await;
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.finished(), 0);

    pool.shutdown_graceful(Duration::from_secs(5)).await?;

    for path in paths {
        assert!(path.exists(), "{} must be retained", path.display());
    }
    assert!(std::fs::read_dir(retry_dir.path())?.next().is_none());
    assert_eq!(hanging.store_notifications(), 0);
    Ok(())
}

#[tokio::test]
async fn child_token_operations_follow_pool_cancellation() -> Result<()> {
    let retry_dir = tempfile::tempdir()?;
    let hanging = host(Reply::Hang, retry_dir.path());
    let mut pool = pool(1);

    let token = pool.child_token();
    pool.submit(UploadOperation::with_cancellation(
        EventBuilder::new("crash-a").in_memory(),
        &hanging,
        token.clone(),
    ))
    .await;
    wait_for_uploads(&hanging, 1).await?;

    pool.shutdown_graceful(Duration::from_secs(5)).await?;

    assert!(token.is_cancelled());
    Ok(())
}

#[tokio::test]
async fn handle_cancels_single_operation() -> Result<()> {
    let retry_dir = tempfile::tempdir()?;
    let hanging = host(Reply::Hang, retry_dir.path());
    let mut pool = pool(4);

    let handle =
        pool.submit(UploadOperation::new(EventBuilder::new("crash-h").in_memory(), &hanging)).await;
    assert_eq!(handle.key().as_str(), "crash-h");
    wait_for_uploads(&hanging, 1).await?;

    handle.cancel();
    pool.drain().await;

    let stats = pool.stats().await;
    assert_eq!(stats.cancelled, 1);
    assert!(!pool.has_active_operations());
    Ok(())
}
