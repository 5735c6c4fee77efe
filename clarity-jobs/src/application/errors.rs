//! Job router errors

use clarity_core::application::ErrorCategory;

use crate::domain::{Backend, BackendError};

#[derive(Debug, thiserror::Error)]
pub enum JobRouterError {
    #[error("Enqueue on {backend} backend failed: {source}")]
    Enqueue {
        backend: Backend,
        source: BackendError,
    },

    #[error("Enqueue failed on current backend ({primary}) and on legacy fallback ({fallback})")]
    FallbackFailed {
        primary: BackendError,
        fallback: BackendError,
    },

    #[error("Job not found on any backend: {0}")]
    NotFound(String),

    #[error("A legacy migration is already running")]
    MigrationInProgress,

    #[error("{backend} backend call failed: {source}")]
    Backend {
        backend: Backend,
        source: BackendError,
    },
}

impl JobRouterError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            JobRouterError::Enqueue { source, .. } | JobRouterError::Backend { source, .. } => {
                source.category()
            }
            JobRouterError::FallbackFailed { .. } => ErrorCategory::Infra,
            JobRouterError::NotFound(_) | JobRouterError::MigrationInProgress => {
                ErrorCategory::Business
            }
        }
    }
}
