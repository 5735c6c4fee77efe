//! Sliding Window Rate Limiter
//!
//! Implements the sliding-window log algorithm: each identifier keeps the
//! timestamps of its admitted events, and a request is admitted only while
//! fewer than `max_requests` events fall inside the trailing window.
//!
//! Unlike a fixed or weighted window this never admits a burst at a window
//! boundary.

use super::storage::RateLimitStorage;
use super::types::{
    AdmissionDecision, RateLimitConfig, RateLimitResult, WindowSnapshot, current_time_millis,
};
use crate::application::errors::{StorageError, with_timeout};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Sliding window limiter over a shared event-log store
pub struct SlidingWindowLimiter {
    storage: Arc<dyn RateLimitStorage>,
    /// Deadline applied to every store call
    storage_timeout: Duration,
}

impl SlidingWindowLimiter {
    /// Create a new sliding window limiter
    pub fn new(storage: Arc<dyn RateLimitStorage>, storage_timeout: Duration) -> Self {
        Self {
            storage,
            storage_timeout,
        }
    }

    /// Evaluate one admission for `config.identifier()`.
    ///
    /// Store failures and timeouts come back as [`AdmissionDecision::InfraError`];
    /// the caller owns the fail-open/fail-closed decision.
    pub async fn evaluate(&self, config: &RateLimitConfig) -> AdmissionDecision {
        self.evaluate_at(config, current_time_millis()).await
    }

    /// [`Self::evaluate`] with an explicit clock reading
    pub async fn evaluate_at(&self, config: &RateLimitConfig, now_ms: u64) -> AdmissionDecision {
        let call = self.storage.try_acquire(
            config.identifier(),
            now_ms,
            config.window_ms(),
            config.max_requests(),
        );

        match with_timeout(self.storage_timeout, call).await {
            Ok(snapshot) => {
                let result = RateLimitResult::from_snapshot(config, &snapshot, now_ms);
                if result.allowed {
                    AdmissionDecision::Allowed(result)
                } else {
                    debug!(
                        identifier = %config.identifier(),
                        count = snapshot.count,
                        retry_after_ms = result.retry_after,
                        "Request denied by sliding window"
                    );
                    AdmissionDecision::Denied(result)
                }
            }
            Err(error) => {
                warn!(
                    identifier = %config.identifier(),
                    category = %error.category(),
                    error = %error,
                    "Rate limit store unavailable"
                );
                AdmissionDecision::InfraError(error)
            }
        }
    }

    /// Read the current window without consuming a slot
    pub async fn peek(&self, config: &RateLimitConfig) -> Result<WindowSnapshot, StorageError> {
        let call = self.storage.peek(
            config.identifier(),
            current_time_millis(),
            config.window_ms(),
        );
        with_timeout(self.storage_timeout, call).await
    }

    /// Clear state for every identifier
    pub async fn clear(&self) -> Result<(), StorageError> {
        with_timeout(self.storage_timeout, self.storage.clear()).await
    }

    /// Reclaim idle logs
    pub async fn cleanup(&self) {
        self.storage.cleanup(current_time_millis()).await;
    }
}
