//! Error types shared by the governance services

/// Whether a failure says something about the protected operation or about
/// the infrastructure used to govern it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Store unreachable, timed out, or returned garbage
    Infra,
    /// The operation itself failed or was legitimately refused
    Business,
}

impl ErrorCategory {
    /// Get the category name for log fields and alerting
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Infra => "infra",
            ErrorCategory::Business => "business",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure of an external store (rate-limit event log, persistent cache tier)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Stored state could not be decoded: {0}")]
    Serialization(String),

    #[error("Store lock poisoned for key {key}")]
    Poisoned { key: String },
}

impl StorageError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Infra
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(error: redis::RedisError) -> Self {
        StorageError::Unavailable(error.to_string())
    }
}

/// Failure of a rate-limited operation, generic over the operation's own error
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E> {
    #[error("Rate limit exceeded for {identifier}, retry after {retry_after_ms}ms")]
    RateLimited {
        identifier: String,
        retry_after_ms: u64,
        /// Denied by the fail-closed policy rather than by the window
        degraded: bool,
    },

    #[error("Circuit open for {identifier}")]
    CircuitOpen { identifier: String },

    #[error("Operation for {identifier} failed after {attempts} attempt(s): {error}")]
    Operation {
        identifier: String,
        attempts: u32,
        error: E,
    },

    #[error("Operation for {identifier} timed out after {timeout_ms}ms")]
    Timeout { identifier: String, timeout_ms: u64 },

    #[error("Batch cancelled before item {id} started")]
    Cancelled { id: String },

    #[error("Batch item {id} failed: {message}")]
    TaskFailed { id: String, message: String },
}

impl<E> ExecuteError<E> {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExecuteError::RateLimited { degraded: true, .. } => ErrorCategory::Infra,
            _ => ErrorCategory::Business,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ExecuteError::RateLimited { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ExecuteError::CircuitOpen { .. })
    }
}

/// Errors surfaced by the cache to its callers.
///
/// Persistent-tier faults never show up here; they are logged and the cache
/// keeps serving from memory.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache value could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Run a store call under a deadline, folding the elapsed case into
/// [`StorageError::Timeout`].
pub async fn with_timeout<T, F>(timeout: std::time::Duration, call: F) -> Result<T, StorageError>
where
    F: std::future::Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
