//! In-process job backend, usable in either role

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::{Backend, BackendError, BackendStats, JobBackend, JobItem};

/// Job store held in process memory (development, tests, single node)
pub struct InMemoryJobBackend {
    kind: Backend,
    jobs: Mutex<HashMap<String, JobItem>>,
}

impl InMemoryJobBackend {
    pub fn new(kind: Backend) -> Self {
        Self {
            kind,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    pub async fn get(&self, job_id: &str) -> Option<JobItem> {
        self.jobs.lock().await.get(job_id).cloned()
    }
}

#[async_trait]
impl JobBackend for InMemoryJobBackend {
    fn kind(&self) -> Backend {
        self.kind
    }

    async fn enqueue(&self, job: JobItem) -> Result<(), BackendError> {
        self.jobs.lock().await.insert(job.id.clone(), job);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<JobItem>, BackendError> {
        let mut jobs = self.jobs.lock().await;
        let next = jobs
            .values()
            .min_by(|a, b| a.dispatch_order(b))
            .map(|job| job.id.clone());

        Ok(next.and_then(|id| jobs.remove(&id)))
    }

    async fn cancel(&self, job_id: &str) -> Result<(), BackendError> {
        self.jobs
            .lock()
            .await
            .remove(job_id)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(job_id.to_string()))
    }

    async fn delete(&self, job_id: &str) -> Result<(), BackendError> {
        self.cancel(job_id).await
    }

    async fn list(&self) -> Result<Vec<JobItem>, BackendError> {
        let mut jobs: Vec<JobItem> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.dispatch_order(b));
        Ok(jobs)
    }

    async fn stats(&self) -> Result<BackendStats, BackendError> {
        Ok(BackendStats {
            backend: self.kind,
            queued: self.len().await as u64,
            healthy: true,
        })
    }

    async fn health_check(&self) -> bool {
        true
    }
}
