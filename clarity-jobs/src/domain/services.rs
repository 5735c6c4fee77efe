//! Ports the router depends on

use async_trait::async_trait;

use clarity_core::application::ErrorCategory;

use super::entities::{Backend, BackendStats, JobItem};

/// Failure reported by a job backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job backend unavailable: {0}")]
    Unavailable(String),

    #[error("Job backend call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Job could not be encoded or decoded: {0}")]
    Serialization(String),
}

impl BackendError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BackendError::NotFound(_) => ErrorCategory::Business,
            _ => ErrorCategory::Infra,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

impl From<redis::RedisError> for BackendError {
    fn from(error: redis::RedisError) -> Self {
        BackendError::Unavailable(error.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(error: serde_json::Error) -> Self {
        BackendError::Serialization(error.to_string())
    }
}

/// A durable job store
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Role this store plays
    fn kind(&self) -> Backend;

    async fn enqueue(&self, job: JobItem) -> Result<(), BackendError>;

    /// Pop the highest-priority, earliest-scheduled job
    async fn dequeue(&self) -> Result<Option<JobItem>, BackendError>;

    /// Remove a queued job; `NotFound` when this store does not hold it
    async fn cancel(&self, job_id: &str) -> Result<(), BackendError>;

    /// Remove a job after it has been copied elsewhere
    async fn delete(&self, job_id: &str) -> Result<(), BackendError>;

    /// Every queued job, in dispatch order
    async fn list(&self) -> Result<Vec<JobItem>, BackendError>;

    async fn stats(&self) -> Result<BackendStats, BackendError>;

    async fn health_check(&self) -> bool;
}

/// Source of uniform draws in `[0, 1)` for testing-mode routing
pub trait Sampler: Send + Sync {
    fn sample(&self) -> f64;
}
