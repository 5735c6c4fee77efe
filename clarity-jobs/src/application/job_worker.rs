//! Background worker pool draining both job backends

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use clarity_core::config::JobsConfig;

use crate::domain::{BackendError, JobBackend, JobItem};

/// Failure reported by a job handler
#[derive(Debug, thiserror::Error)]
pub enum JobProcessingError {
    #[error("Job handler failed: {0}")]
    Failed(String),

    #[error("No handler for job type: {0}")]
    UnknownJobType(String),
}

/// Executes dequeued jobs
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobItem) -> Result<(), JobProcessingError>;
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    /// Idle wait when every backend is empty
    pub poll_interval: Duration,
    /// Attempts before a failing job is dropped
    pub max_attempts: u32,
    /// Deadline for each dequeue or re-enqueue round trip
    pub operation_timeout: Duration,
}

impl WorkerPoolConfig {
    pub fn from_config(config: &JobsConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency,
            poll_interval: Duration::from_millis(config.worker_poll_interval_ms),
            max_attempts: config.max_job_attempts,
            operation_timeout: config.operation_timeout(),
        }
    }
}

/// Spawn a worker pool that drains `backends` in order until `shutdown` fires.
///
/// At most `concurrency` jobs run at once. A failed job is re-enqueued on the
/// backend it came from with `attempts + 1` until `max_attempts` is reached.
/// The returned handle resolves once in-flight jobs have finished.
pub fn spawn_job_worker_pool(
    backends: Vec<Arc<dyn JobBackend>>,
    handler: Arc<dyn JobHandler>,
    config: WorkerPoolConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let concurrency = config.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    tokio::spawn(async move {
        info!("Job worker pool started with concurrency: {}", concurrency);

        loop {
            // Wait for a permit before polling for a job
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(err) => {
                        error!(error = %err, "Failed to acquire concurrency permit for job processing");
                        break;
                    }
                },
            };

            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    drop(permit);
                    break;
                }
                next = next_job(&backends, config.operation_timeout) => next,
            };

            match next {
                Some((backend, job)) => {
                    let handler = Arc::clone(&handler);
                    let max_attempts = config.max_attempts;
                    let operation_timeout = config.operation_timeout;
                    tokio::spawn(async move {
                        process_job(backend, handler, job, max_attempts, operation_timeout).await;
                        drop(permit);
                    });
                }
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(config.poll_interval) => {}
                    }
                }
            }
        }

        // Every permit back means every in-flight job has finished
        if semaphore.acquire_many(concurrency as u32).await.is_err() {
            warn!("Job worker pool semaphore closed during shutdown");
        }
        info!("Job worker pool stopped");
    })
}

/// Bound a backend call; an elapsed deadline becomes `BackendError::Timeout`
async fn with_deadline<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// First job from the first non-empty backend. A failing or slow backend is
/// skipped for this round.
async fn next_job(
    backends: &[Arc<dyn JobBackend>],
    timeout: Duration,
) -> Option<(Arc<dyn JobBackend>, JobItem)> {
    for backend in backends {
        match with_deadline(timeout, backend.dequeue()).await {
            Ok(Some(job)) => return Some((Arc::clone(backend), job)),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    backend = %backend.kind(),
                    category = %e.category(),
                    error = %e,
                    "Failed to poll job backend"
                );
            }
        }
    }
    None
}

async fn process_job(
    backend: Arc<dyn JobBackend>,
    handler: Arc<dyn JobHandler>,
    job: JobItem,
    max_attempts: u32,
    operation_timeout: Duration,
) {
    debug!(job_id = %job.id, job_type = %job.job_type, backend = %backend.kind(), "Processing job");

    let error = match handler.handle(&job).await {
        Ok(()) => {
            info!(job_id = %job.id, job_type = %job.job_type, "Job completed");
            return;
        }
        Err(e) => e,
    };

    let retry = job.next_attempt();
    if retry.attempts >= max_attempts {
        error!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = retry.attempts,
            error = %error,
            "Job failed permanently"
        );
        return;
    }

    warn!(
        job_id = %job.id,
        attempts = retry.attempts,
        error = %error,
        "Job failed, re-enqueueing"
    );
    if let Err(e) = with_deadline(operation_timeout, backend.enqueue(retry)).await {
        error!(job_id = %job.id, error = %e, "Failed to re-enqueue job; job lost");
    }
}
