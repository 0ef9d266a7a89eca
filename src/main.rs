//! Crashlane retry flusher.
//!
//! Loads settings, uploads every payload stored in the retry directory, and
//! exits. A shutdown signal cancels outstanding uploads and leaves their
//! payloads for the next run.

use anyhow::{Context, Result};
use crashlane::{flush, Settings};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    init_tracing(&settings)?;

    info!(
        endpoint = %settings.endpoint,
        retry_directory = %settings.retry_directory.display(),
        max_concurrent = settings.max_concurrent,
        "Starting crashlane flush"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, cancelling uploads");
            shutdown.cancel();
        }
    });

    let report = flush(&settings, shutdown).await?;

    info!(
        pending = report.pending,
        delivered = report.stats.delivered,
        rejected = report.stats.rejected,
        retained = report.retry_keys.len(),
        cancelled = report.stats.cancelled,
        "Crashlane flush complete"
    );

    if report.stats.panicked > 0 {
        error!(panicked = report.stats.panicked, "Some uploads did not complete");
    }

    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing(settings: &Settings) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .context("invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    if settings.log_json {
        registry.with(fmt::layer().json().with_current_span(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true).with_file(true).with_line_number(true)).init();
    }

    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
