//! Rate Limiter Service
//!
//! The main service that coordinates admission control across the application.
//! Provides a unified interface for:
//! - Sliding window admission checks with a deliberate infra-failure policy
//! - Rate-limited execution guarded by a per-identifier circuit breaker
//! - Observability and administrative reset

use super::sliding_window::SlidingWindowLimiter;
use super::storage::{DragonflyRateLimitStorage, InMemoryRateLimitStorage, RateLimitStorage};
use super::types::{
    AdmissionDecision, RateLimitConfig, RateLimitResult, RateLimitStatus, current_time_millis,
};
use crate::application::errors::{ExecuteError, StorageError};
use crate::config::{InfraFailurePolicy, RateLimitStorageBackend, RateLimiterConfig};
use crate::infrastructure::resilience::{CircuitBreakerRegistry, CircuitState, RetryConfig};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Key prefix for event logs kept in Dragonfly
pub const RATE_LIMIT_KEY_PREFIX: &str = "clarity:ratelimit";

/// Main rate limiter service
pub struct RateLimiterService {
    /// Sliding window over the event-log store
    limiter: SlidingWindowLimiter,
    /// One breaker per identifier
    breakers: CircuitBreakerRegistry,
    /// Last config seen per identifier, for status reporting
    known: DashMap<String, RateLimitConfig>,
    retry: RetryConfig,
    /// Configuration
    config: RateLimiterConfig,
}

impl RateLimiterService {
    /// Create a new rate limiter service, connecting to Dragonfly when configured.
    ///
    /// An unreachable Dragonfly at startup falls back to in-memory storage.
    pub async fn new(config: RateLimiterConfig) -> Self {
        let storage: Arc<dyn RateLimitStorage> = match config.storage_backend {
            RateLimitStorageBackend::Dragonfly => {
                match DragonflyRateLimitStorage::new(&config.dragonfly_url, RATE_LIMIT_KEY_PREFIX)
                    .await
                {
                    Ok(storage) => {
                        info!(
                            "Rate limiter using Dragonfly storage backend at {}",
                            config.dragonfly_url
                        );
                        Arc::new(storage)
                    }
                    Err(e) => {
                        warn!(
                            "Failed to connect to Dragonfly for rate limiting, falling back to in-memory: {}",
                            e
                        );
                        Arc::new(InMemoryRateLimitStorage::new())
                    }
                }
            }
            RateLimitStorageBackend::Memory => {
                info!("Rate limiter using in-memory storage backend");
                Arc::new(InMemoryRateLimitStorage::new())
            }
        };

        Self::with_storage(storage, config)
    }

    /// Create with a custom storage backend (for testing)
    pub fn with_storage(storage: Arc<dyn RateLimitStorage>, config: RateLimiterConfig) -> Self {
        Self {
            limiter: SlidingWindowLimiter::new(storage, config.storage_timeout()),
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker.to_circuit_breaker_config()),
            known: DashMap::new(),
            retry: config.retry.to_retry_config(),
            config,
        }
    }

    /// Evaluate one admission and return the raw decision, infra failures included
    pub async fn evaluate(&self, config: &RateLimitConfig) -> AdmissionDecision {
        self.remember(config);
        self.limiter.evaluate(config).await
    }

    /// Check and consume one slot for `config.identifier()`.
    ///
    /// Infra failures are resolved by the configured [`InfraFailurePolicy`]
    /// and the result is marked `degraded`. They never touch the circuit breaker.
    pub async fn check_rate_limit(&self, config: &RateLimitConfig) -> RateLimitResult {
        match self.evaluate(config).await {
            AdmissionDecision::Allowed(result) | AdmissionDecision::Denied(result) => result,
            AdmissionDecision::InfraError(error) => self.apply_failure_policy(config, &error),
        }
    }

    fn apply_failure_policy(&self, config: &RateLimitConfig, error: &StorageError) -> RateLimitResult {
        let now = current_time_millis();
        let reset_at = now + config.window_ms();

        match self.config.infra_failure_policy {
            InfraFailurePolicy::FailOpen => {
                warn!(
                    identifier = %config.identifier(),
                    category = %error.category(),
                    error = %error,
                    "Rate limit check failed open"
                );
                RateLimitResult {
                    degraded: true,
                    ..RateLimitResult::allowed(config.max_requests(), config.max_requests(), reset_at)
                }
            }
            InfraFailurePolicy::FailClosed => {
                warn!(
                    identifier = %config.identifier(),
                    category = %error.category(),
                    error = %error,
                    "Rate limit check failed closed"
                );
                RateLimitResult {
                    degraded: true,
                    ..RateLimitResult::blocked(config.max_requests(), reset_at, config.window_ms())
                }
            }
        }
    }

    /// Run `operation` under the rate limit and the identifier's circuit breaker.
    ///
    /// `max_retries` is the total attempt budget, applied separately to
    /// rate-limit denials (each followed by a `retry_after` sleep) and to
    /// operation failures (each followed by exponential backoff). Every
    /// operation attempt is admitted by the limiter first.
    pub async fn execute_with_rate_limit<T, E, F, Fut>(
        &self,
        config: &RateLimitConfig,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let identifier = config.identifier();
        let max_attempts = max_retries.max(1);
        let breaker = self.breakers.get_or_create(identifier);
        let operation_timeout = self.config.operation_timeout();

        let mut denials: u32 = 0;
        let mut attempts: u32 = 0;

        loop {
            let admission = self.check_rate_limit(config).await;
            if !admission.allowed {
                denials += 1;
                let retry_after_ms = admission.retry_after.unwrap_or(config.window_ms());

                if denials >= max_attempts {
                    debug!(
                        identifier = %identifier,
                        denials,
                        "Rate limit retries exhausted"
                    );
                    return Err(ExecuteError::RateLimited {
                        identifier: identifier.to_string(),
                        retry_after_ms,
                        degraded: admission.degraded,
                    });
                }

                tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
                continue;
            }

            if !breaker.try_acquire().await {
                debug!(identifier = %identifier, "Circuit open, operation not invoked");
                return Err(ExecuteError::CircuitOpen {
                    identifier: identifier.to_string(),
                });
            }

            attempts += 1;
            let failure = match tokio::time::timeout(operation_timeout, operation()).await {
                Ok(Ok(value)) => {
                    breaker.on_success().await;
                    return Ok(value);
                }
                Ok(Err(error)) => ExecuteError::Operation {
                    identifier: identifier.to_string(),
                    attempts,
                    error,
                },
                Err(_) => ExecuteError::Timeout {
                    identifier: identifier.to_string(),
                    timeout_ms: operation_timeout.as_millis() as u64,
                },
            };

            let state = breaker.on_failure().await;

            if attempts >= max_attempts || state == CircuitState::Open {
                error!(
                    identifier = %identifier,
                    attempts,
                    circuit = %state,
                    category = %failure.category(),
                    error = %failure,
                    "Rate-limited operation failed"
                );
                return Err(failure);
            }

            let delay = self.retry.delay_for_retry(attempts);
            warn!(
                identifier = %identifier,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Rate-limited operation failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Current window and circuit state for an identifier.
    ///
    /// Returns `None` for identifiers never checked since the last reset.
    pub async fn get_rate_limit_status(
        &self,
        identifier: &str,
    ) -> Result<Option<RateLimitStatus>, StorageError> {
        let Some(config) = self.known.get(identifier).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };

        let snapshot = self.limiter.peek(&config).await?;
        let circuit = match self.breakers.get(identifier) {
            Some(breaker) => breaker.snapshot().await,
            None => Default::default(),
        };

        Ok(Some(RateLimitStatus {
            identifier: identifier.to_string(),
            limit: config.max_requests(),
            window_ms: config.window_ms(),
            window_count: snapshot.count,
            remaining: config.max_requests().saturating_sub(snapshot.count),
            reset_at: snapshot.oldest_ms.map(|oldest| oldest + config.window_ms()),
            circuit,
        }))
    }

    /// Reset every window and circuit breaker (administrative/test use)
    pub async fn clear_rate_limits(&self) -> Result<(), StorageError> {
        self.limiter.clear().await?;
        self.breakers.clear();
        self.known.clear();
        info!("Rate limits cleared");
        Ok(())
    }

    /// Start the cleanup task for in-memory storage
    pub fn start_cleanup_task(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval_seconds);

        tokio::spawn(async move {
            let mut interval = interval(cleanup_interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Rate limiter cleanup task stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        service.limiter.cleanup().await;
                        debug!("Rate limiter cleanup completed");
                    }
                }
            }
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    fn remember(&self, config: &RateLimitConfig) {
        let unchanged = self
            .known
            .get(config.identifier())
            .is_some_and(|known| known.value() == config);
        if !unchanged {
            self.known
                .insert(config.identifier().to_string(), config.clone());
        }
    }
}
