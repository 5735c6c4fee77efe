//! Test configuration fixtures for clarity-core

use std::sync::Arc;

use clarity_core::config::{
    CacheConfig, CircuitBreakerConfigSerializable, InfraFailurePolicy, RateLimitStorageBackend,
    RateLimiterConfig, RetryConfigSerializable,
};
use clarity_core::infrastructure::cache::{CacheService, PersistentCacheStore};
use clarity_core::infrastructure::rate_limiter::{
    InMemoryRateLimitStorage, RateLimitConfig, RateLimitStorage, RateLimiterService,
};

/// Limiter config with fast retries and a low breaker threshold
pub fn limiter_config(failure_threshold: u32) -> RateLimiterConfig {
    RateLimiterConfig {
        storage_backend: RateLimitStorageBackend::Memory,
        storage_timeout_ms: 100,
        operation_timeout_ms: 500,
        infra_failure_policy: InfraFailurePolicy::FailOpen,
        circuit_breaker: CircuitBreakerConfigSerializable {
            failure_threshold,
            recovery_timeout_seconds: 1,
            half_open_max_requests: 1,
        },
        retry: RetryConfigSerializable {
            initial_delay_ms: 5,
            max_delay_ms: 20,
            backoff_multiplier: 2.0,
        },
        ..RateLimiterConfig::default()
    }
}

pub fn memory_limiter(failure_threshold: u32) -> Arc<RateLimiterService> {
    Arc::new(RateLimiterService::with_storage(
        Arc::new(InMemoryRateLimitStorage::new()),
        limiter_config(failure_threshold),
    ))
}

pub fn limiter_over(
    storage: Arc<dyn RateLimitStorage>,
    config: RateLimiterConfig,
) -> Arc<RateLimiterService> {
    Arc::new(RateLimiterService::with_storage(storage, config))
}

pub fn rate(identifier: &str, max_requests: u32, window_ms: u64) -> RateLimitConfig {
    RateLimitConfig::new(identifier, max_requests, window_ms).expect("valid rate limit config")
}

pub fn cache_config() -> CacheConfig {
    CacheConfig {
        operation_timeout_ms: 100,
        ..CacheConfig::default()
    }
}

pub fn cache_with(persistent: Option<Arc<dyn PersistentCacheStore>>) -> CacheService {
    let config = CacheConfig {
        persistent_enabled: persistent.is_some(),
        ..cache_config()
    };
    CacheService::with_persistent(config, persistent)
}
