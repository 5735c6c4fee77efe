//! Rate limiter types and core data structures

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::application::errors::StorageError;
use crate::config::ValidationError;
use crate::infrastructure::resilience::CircuitSnapshot;

/// Independent admission-control bucket.
///
/// Construct through [`RateLimitConfig::new`], which rejects zero limits and
/// zero-length windows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitConfig {
    identifier: String,
    max_requests: u32,
    window_ms: u64,
}

impl RateLimitConfig {
    pub fn new(
        identifier: impl Into<String>,
        max_requests: u32,
        window_ms: u64,
    ) -> Result<Self, ValidationError> {
        let identifier = identifier.into();

        if identifier.trim().is_empty() {
            return Err(ValidationError::rate_limit("identifier cannot be empty"));
        }
        if max_requests == 0 {
            return Err(ValidationError::rate_limit(format!(
                "max_requests must be greater than 0 for {}",
                identifier
            )));
        }
        if window_ms == 0 {
            return Err(ValidationError::rate_limit(format!(
                "window_ms must be greater than 0 for {}",
                identifier
            )));
        }

        Ok(Self {
            identifier,
            max_requests,
            window_ms,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Maximum requests allowed in the window
    pub limit: u32,
    /// `max(0, limit - count_in_window)`
    pub remaining: u32,
    /// Unix timestamp (ms) at which the oldest counted event expires
    pub reset_at: u64,
    /// Milliseconds to wait before retrying (only set when denied)
    pub retry_after: Option<u64>,
    /// Set when the store could not be consulted and a failure policy decided
    pub degraded: bool,
}

impl RateLimitResult {
    /// Create a new allowed result
    pub fn allowed(limit: u32, remaining: u32, reset_at: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after: None,
            degraded: false,
        }
    }

    /// Create a new blocked result
    pub fn blocked(limit: u32, reset_at: u64, retry_after: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after: Some(retry_after),
            degraded: false,
        }
    }

    /// Build a result from the window state a store reported
    pub fn from_snapshot(config: &RateLimitConfig, snapshot: &WindowSnapshot, now_ms: u64) -> Self {
        let limit = config.max_requests();
        let reset_at = snapshot
            .oldest_ms
            .map(|oldest| oldest + config.window_ms())
            .unwrap_or(now_ms + config.window_ms());

        if snapshot.admitted {
            Self::allowed(limit, limit.saturating_sub(snapshot.count), reset_at)
        } else {
            // At least 1ms so callers that sleep on it always make progress
            let retry_after = reset_at.saturating_sub(now_ms).max(1);
            Self::blocked(limit, reset_at, retry_after)
        }
    }
}

/// Window state after a store operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Whether the event was appended
    pub admitted: bool,
    /// Events inside the window after the operation
    pub count: u32,
    /// Timestamp (ms) of the oldest event still inside the window
    pub oldest_ms: Option<u64>,
}

impl WindowSnapshot {
    pub fn empty() -> Self {
        Self {
            admitted: false,
            count: 0,
            oldest_ms: None,
        }
    }
}

/// Outcome of evaluating one admission against the store.
///
/// Infrastructure failure is a distinct arm so the caller decides whether it
/// fails open or closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed(RateLimitResult),
    Denied(RateLimitResult),
    InfraError(StorageError),
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allowed(_))
    }
}

/// Observability view of one identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub identifier: String,
    pub limit: u32,
    pub window_ms: u64,
    /// Events currently counted in the window
    pub window_count: u32,
    pub remaining: u32,
    /// Unix timestamp (ms) at which the oldest counted event expires
    pub reset_at: Option<u64>,
    pub circuit: CircuitSnapshot,
}

/// Get current time in milliseconds since Unix epoch
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
