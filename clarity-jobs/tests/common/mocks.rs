//! Mock backends and samplers for clarity-jobs tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clarity_jobs::domain::{Backend, BackendError, BackendStats, JobBackend, JobItem, Sampler};
use clarity_jobs::infrastructure::InMemoryJobBackend;

/// Always returns the same draw
pub struct FixedSampler(pub f64);

impl Sampler for FixedSampler {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// Returns queued draws in order, then 0.99
pub struct SequenceSampler(Mutex<VecDeque<f64>>);

impl SequenceSampler {
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self(Mutex::new(draws.into_iter().collect()))
    }
}

impl Sampler for SequenceSampler {
    fn sample(&self) -> f64 {
        self.0.lock().unwrap().pop_front().unwrap_or(0.99)
    }
}

/// Backend whose every call fails with the same error
pub struct FailingBackend {
    pub kind: Backend,
    pub error: BackendError,
    pub calls: AtomicUsize,
}

impl FailingBackend {
    pub fn new(kind: Backend, error: BackendError) -> Self {
        Self {
            kind,
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable(kind: Backend) -> Self {
        Self::new(kind, BackendError::Unavailable("connection refused".to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

#[async_trait]
impl JobBackend for FailingBackend {
    fn kind(&self) -> Backend {
        self.kind
    }

    async fn enqueue(&self, _job: JobItem) -> Result<(), BackendError> {
        self.fail()
    }

    async fn dequeue(&self) -> Result<Option<JobItem>, BackendError> {
        self.fail()
    }

    async fn cancel(&self, _job_id: &str) -> Result<(), BackendError> {
        self.fail()
    }

    async fn delete(&self, _job_id: &str) -> Result<(), BackendError> {
        self.fail()
    }

    async fn list(&self) -> Result<Vec<JobItem>, BackendError> {
        self.fail()
    }

    async fn stats(&self) -> Result<BackendStats, BackendError> {
        self.fail()
    }

    async fn health_check(&self) -> bool {
        false
    }
}

/// Backend that never answers; exercises the router's timeouts
pub struct HangingBackend(pub Backend);

#[async_trait]
impl JobBackend for HangingBackend {
    fn kind(&self) -> Backend {
        self.0
    }

    async fn enqueue(&self, _job: JobItem) -> Result<(), BackendError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<JobItem>, BackendError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }

    async fn cancel(&self, _job_id: &str) -> Result<(), BackendError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn delete(&self, _job_id: &str) -> Result<(), BackendError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<JobItem>, BackendError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    async fn stats(&self) -> Result<BackendStats, BackendError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(BackendStats {
            backend: self.0,
            queued: 0,
            healthy: true,
        })
    }

    async fn health_check(&self) -> bool {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        true
    }
}

/// In-memory backend whose `delete` always fails
pub struct UndeletableBackend {
    pub inner: InMemoryJobBackend,
}

impl UndeletableBackend {
    pub fn new(kind: Backend) -> Self {
        Self {
            inner: InMemoryJobBackend::new(kind),
        }
    }
}

#[async_trait]
impl JobBackend for UndeletableBackend {
    fn kind(&self) -> Backend {
        self.inner.kind()
    }

    async fn enqueue(&self, job: JobItem) -> Result<(), BackendError> {
        self.inner.enqueue(job).await
    }

    async fn dequeue(&self) -> Result<Option<JobItem>, BackendError> {
        self.inner.dequeue().await
    }

    async fn cancel(&self, job_id: &str) -> Result<(), BackendError> {
        self.inner.cancel(job_id).await
    }

    async fn delete(&self, _job_id: &str) -> Result<(), BackendError> {
        Err(BackendError::Unavailable("table locked".to_string()))
    }

    async fn list(&self) -> Result<Vec<JobItem>, BackendError> {
        self.inner.list().await
    }

    async fn stats(&self) -> Result<BackendStats, BackendError> {
        self.inner.stats().await
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// In-memory backend that records the order jobs were enqueued in
pub struct RecordingBackend {
    pub inner: InMemoryJobBackend,
    enqueued: Mutex<Vec<JobItem>>,
}

impl RecordingBackend {
    pub fn new(kind: Backend) -> Self {
        Self {
            inner: InMemoryJobBackend::new(kind),
            enqueued: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueued(&self) -> Vec<JobItem> {
        self.enqueued.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobBackend for RecordingBackend {
    fn kind(&self) -> Backend {
        self.inner.kind()
    }

    async fn enqueue(&self, job: JobItem) -> Result<(), BackendError> {
        self.enqueued.lock().unwrap().push(job.clone());
        self.inner.enqueue(job).await
    }

    async fn dequeue(&self) -> Result<Option<JobItem>, BackendError> {
        self.inner.dequeue().await
    }

    async fn cancel(&self, job_id: &str) -> Result<(), BackendError> {
        self.inner.cancel(job_id).await
    }

    async fn delete(&self, job_id: &str) -> Result<(), BackendError> {
        self.inner.delete(job_id).await
    }

    async fn list(&self) -> Result<Vec<JobItem>, BackendError> {
        self.inner.list().await
    }

    async fn stats(&self) -> Result<BackendStats, BackendError> {
        self.inner.stats().await
    }

    async fn health_check(&self) -> bool {
        true
    }
}
