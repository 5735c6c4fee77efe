//! Application setup and wiring

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use clarity_core::Config;
use clarity_core::config::{JobBackendKind, JobsConfig, ValidationError};
use clarity_core::infrastructure::{CacheService, RateLimiterService};
use clarity_jobs::domain::{Backend, BackendError, JobBackend};
use clarity_jobs::infrastructure::{DragonflyJobBackend, InMemoryJobBackend, SeededSampler};
use clarity_jobs::JobRouter;
use clarity_jobs::application::RouterStatus;

use crate::workers::{self, LoggingJobHandler};

/// Failure while assembling the application
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("Failed to connect {backend} job backend: {source}")]
    JobBackend {
        backend: Backend,
        #[source]
        source: BackendError,
    },
}

/// Handle returned from create_app for graceful shutdown coordination
pub struct AppHandle {
    pub rate_limiter: Arc<RateLimiterService>,
    pub cache: Arc<CacheService>,
    pub job_router: Arc<JobRouter>,
    pub shutdown_token: CancellationToken,
    background_tasks: Vec<JoinHandle<()>>,
}

impl AppHandle {
    pub async fn status(&self) -> RouterStatus {
        self.job_router.get_status().await
    }

    /// Cancel every background task and wait up to `timeout` for them to finish
    pub async fn shutdown(self, timeout: Duration) {
        self.shutdown_token.cancel();

        let tasks = futures::future::join_all(self.background_tasks);
        match tokio::time::timeout(timeout, tasks).await {
            Ok(results) => {
                let failed = results.iter().filter(|r| r.is_err()).count();
                if failed > 0 {
                    tracing::warn!(failed, "Background tasks ended abnormally");
                }
                tracing::info!("Background tasks stopped");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Background tasks did not stop before the shutdown timeout"
                );
            }
        }
    }
}

/// Build every service from `config` and start the background workers
pub async fn create_app(config: Config) -> Result<AppHandle, AppError> {
    let startup_time = Instant::now();
    let shutdown_token = CancellationToken::new();

    // Rate limiter falls back to in-memory storage when Dragonfly is unreachable
    let rate_limiter = Arc::new(RateLimiterService::new(config.rate_limit.clone()).await);

    // Cache runs memory-only when the persistent tier is unreachable
    let cache = Arc::new(CacheService::new(config.cache.clone()).await);

    let (legacy, current) = build_job_backends(&config.jobs).await?;
    let sampler = Arc::new(SeededSampler::new(config.jobs.migration.sampling_seed));
    let job_router = Arc::new(JobRouter::from_config(
        &config.jobs,
        legacy,
        current,
        sampler,
    )?);

    let mut background_tasks = vec![
        rate_limiter.start_cleanup_task(shutdown_token.child_token()),
        cache.start_sweep_task(shutdown_token.child_token()),
        workers::spawn_job_workers(
            &job_router,
            Arc::new(LoggingJobHandler),
            &config.jobs,
            shutdown_token.child_token(),
        ),
    ];

    if config.jobs.migration.migrate_on_startup {
        background_tasks.push(workers::spawn_startup_migration(
            Arc::clone(&job_router),
            shutdown_token.child_token(),
        ));
    }

    tracing::info!(
        startup_ms = startup_time.elapsed().as_millis() as u64,
        rate_limit_backend = ?config.rate_limit.storage_backend,
        persistent_cache = cache.has_persistent_tier(),
        job_backend = ?config.jobs.backend,
        migration_mode = config.jobs.migration.mode.as_str(),
        "Application initialized"
    );

    Ok(AppHandle {
        rate_limiter,
        cache,
        job_router,
        shutdown_token,
        background_tasks,
    })
}

async fn build_job_backends(
    config: &JobsConfig,
) -> Result<(Arc<dyn JobBackend>, Arc<dyn JobBackend>), AppError> {
    match config.backend {
        JobBackendKind::Memory => {
            tracing::info!("Job router using in-memory backends");
            Ok((
                Arc::new(InMemoryJobBackend::new(Backend::Legacy)),
                Arc::new(InMemoryJobBackend::new(Backend::Current)),
            ))
        }
        JobBackendKind::Dragonfly => {
            let legacy = connect_job_backend(config, Backend::Legacy).await?;
            let current = connect_job_backend(config, Backend::Current).await?;
            tracing::info!(url = %config.dragonfly_url, "Job router using Dragonfly backends");
            Ok((legacy, current))
        }
    }
}

/// Jobs are durable state, so an unreachable store fails startup
async fn connect_job_backend(
    config: &JobsConfig,
    backend: Backend,
) -> Result<Arc<dyn JobBackend>, AppError> {
    let store = DragonflyJobBackend::new(&config.dragonfly_url, &config.key_prefix, backend)
        .await
        .map_err(|source| AppError::JobBackend { backend, source })?;
    Ok(Arc::new(store))
}
