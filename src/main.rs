//! Clarity Governance - service entry point
//!
//! Starts the rate limiter, cache and job router with their background
//! workers and runs until Ctrl+C or SIGTERM.

use std::time::Duration;
use tokio::signal;

use clarity_governance::{Config, create_app, init_tracing};

/// Grace period for background tasks after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Err(e) = dotenvy::dotenv() {
        // Only warn if it's not a "file not found" error
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let config = Config::load().map_err(|e| {
        std::io::Error::other(format!(
            "Failed to load configuration. Check config/*.toml and CLARITY__* env vars: {}",
            e
        ))
    })?;

    // Initialize tracing (after config is loaded so we can use logging config)
    init_tracing(&config.logging)?;

    tracing::info!("Starting Clarity governance service...");

    let app_handle = create_app(config).await?;

    let status = app_handle.status().await;
    tracing::info!(
        mode = status.mode.as_str(),
        current_backend_enabled = status.current_backend_enabled,
        legacy_queued = status.legacy.queued,
        legacy_healthy = status.legacy.healthy,
        current_queued = status.current.queued,
        current_healthy = status.current.healthy,
        "Job router ready"
    );
    if let Ok(stats) = app_handle.job_router.get_migration_stats().await {
        tracing::info!(
            migration_percentage = stats.migration_percentage,
            total_jobs = stats.total_jobs,
            "Migration progress"
        );
    }

    shutdown_signal().await;

    tracing::info!("Cancelling background tasks...");
    app_handle.shutdown(SHUTDOWN_TIMEOUT).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
