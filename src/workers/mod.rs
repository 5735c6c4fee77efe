//! Background workers for the governance service
//!
//! Job draining and the one-time legacy migration. Rate limiter and cache
//! maintenance tasks are started by their services.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use clarity_core::config::JobsConfig;
use clarity_jobs::application::{
    JobHandler, JobProcessingError, WorkerPoolConfig, spawn_job_worker_pool,
};
use clarity_jobs::domain::JobItem;
use clarity_jobs::{JobRouter, JobRouterError};

/// Handler used until job types are bound to their executors; records each
/// job and completes it.
pub struct LoggingJobHandler;

#[async_trait]
impl JobHandler for LoggingJobHandler {
    async fn handle(&self, job: &JobItem) -> Result<(), JobProcessingError> {
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            user_id = %job.user_id,
            priority = %job.priority,
            backend = %job.target_backend,
            attempts = job.attempts,
            "Handled job"
        );
        Ok(())
    }
}

/// Spawn the worker pool over both backends, current first
pub fn spawn_job_workers(
    router: &Arc<JobRouter>,
    handler: Arc<dyn JobHandler>,
    config: &JobsConfig,
    shutdown_token: CancellationToken,
) -> JoinHandle<()> {
    spawn_job_worker_pool(
        router.backends_in_drain_order(),
        handler,
        WorkerPoolConfig::from_config(config),
        shutdown_token,
    )
}

/// Run the legacy migration once. Skipped if shutdown has already begun;
/// a started migration runs to completion.
pub fn spawn_startup_migration(
    router: Arc<JobRouter>,
    shutdown_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if shutdown_token.is_cancelled() {
            info!("Startup migration skipped due to shutdown");
            return;
        }

        info!("Starting legacy job migration");

        match router.migrate_existing_jobs().await {
            Ok(report) => {
                info!(
                    total = report.total,
                    migrated = report.migrated,
                    skipped = report.skipped,
                    failed = report.failed,
                    duration_ms = report.duration_ms,
                    "Startup migration finished"
                );
            }
            Err(JobRouterError::MigrationInProgress) => {
                info!("Migration already running, startup migration skipped");
            }
            Err(e) => {
                error!(category = %e.category(), error = %e, "Startup migration failed");
            }
        }
    })
}
