//! Configuration validation module

use crate::config::{
    CacheConfig, JobPriority, JobsConfig, LoggingConfig, MigrationMode, MigrationPolicyConfig,
    RateLimiterConfig,
};

/// Trait for validating configuration sections
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Logging configuration error: {message}")]
    Logging { message: String },

    #[error("Rate limit configuration error: {message}")]
    RateLimit { message: String },

    #[error("Cache configuration error: {message}")]
    Cache { message: String },

    #[error("Job routing configuration error: {message}")]
    Jobs { message: String },
}

impl ValidationError {
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn jobs(message: impl Into<String>) -> Self {
        Self::Jobs {
            message: message.into(),
        }
    }
}

impl Validate for LoggingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.level.trim().is_empty() {
            return Err(ValidationError::logging("Log level cannot be empty"));
        }

        match self.format.as_str() {
            "json" | "pretty" => Ok(()),
            other => Err(ValidationError::logging(format!(
                "Log format must be 'json' or 'pretty', got: {}",
                other
            ))),
        }
    }
}

impl Validate for RateLimiterConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.storage_timeout_ms == 0 {
            return Err(ValidationError::rate_limit(
                "storage_timeout_ms must be greater than 0",
            ));
        }

        if self.operation_timeout_ms == 0 {
            return Err(ValidationError::rate_limit(
                "operation_timeout_ms must be greater than 0",
            ));
        }

        if self.cleanup_interval_seconds == 0 {
            return Err(ValidationError::rate_limit(
                "cleanup_interval_seconds must be greater than 0",
            ));
        }

        if self.default_max_retries == 0 {
            return Err(ValidationError::rate_limit(
                "default_max_retries must be at least 1",
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ValidationError::rate_limit(
                "circuit_breaker.failure_threshold must be greater than 0",
            ));
        }

        if self.circuit_breaker.recovery_timeout_seconds == 0 {
            return Err(ValidationError::rate_limit(
                "circuit_breaker.recovery_timeout_seconds must be greater than 0",
            ));
        }

        if self.circuit_breaker.half_open_max_requests == 0 {
            return Err(ValidationError::rate_limit(
                "circuit_breaker.half_open_max_requests must be greater than 0",
            ));
        }

        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(ValidationError::rate_limit(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ValidationError::rate_limit(
                "retry.initial_delay_ms cannot exceed retry.max_delay_ms",
            ));
        }

        Ok(())
    }
}

impl Validate for CacheConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.default_ttl_seconds == 0 {
            return Err(ValidationError::cache(
                "Cache TTL must be greater than 0 seconds",
            ));
        }

        if self.l1_cache_size_mb == 0 {
            return Err(ValidationError::cache(
                "l1_cache_size_mb must be greater than 0",
            ));
        }

        if self.operation_timeout_ms == 0 {
            return Err(ValidationError::cache(
                "operation_timeout_ms must be greater than 0",
            ));
        }

        if self.sweep_interval_seconds == 0 {
            return Err(ValidationError::cache(
                "sweep_interval_seconds must be greater than 0",
            ));
        }

        if self.persistent_enabled
            && !self.dragonfly_url.starts_with("redis://")
            && !self.dragonfly_url.starts_with("rediss://")
        {
            return Err(ValidationError::cache(format!(
                "dragonfly_url must start with redis:// or rediss://, got: {}",
                self.dragonfly_url
            )));
        }

        Ok(())
    }
}

impl Validate for MigrationPolicyConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&self.testing_sample_rate) {
            return Err(ValidationError::jobs(format!(
                "testing_sample_rate must be within [0, 1], got {}",
                self.testing_sample_rate
            )));
        }

        if self.mode == MigrationMode::Immediate && !self.enable_current_backend {
            return Err(ValidationError::jobs(
                "mode 'immediate' requires enable_current_backend = true",
            ));
        }

        if let Some(unknown) = self
            .priority_eligibility
            .keys()
            .find(|name| JobPriority::parse(name).is_none())
        {
            return Err(ValidationError::jobs(format!(
                "Unknown priority in priority_eligibility: {}",
                unknown
            )));
        }

        Ok(())
    }
}

impl Validate for JobsConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.operation_timeout_ms == 0 {
            return Err(ValidationError::jobs(
                "operation_timeout_ms must be greater than 0",
            ));
        }

        if self.worker_concurrency == 0 {
            return Err(ValidationError::jobs(
                "worker_concurrency must be greater than 0",
            ));
        }

        if self.worker_poll_interval_ms == 0 {
            return Err(ValidationError::jobs(
                "worker_poll_interval_ms must be greater than 0",
            ));
        }

        if self.max_job_attempts == 0 {
            return Err(ValidationError::jobs(
                "max_job_attempts must be greater than 0",
            ));
        }

        if self.job_priorities.keys().any(|job_type| job_type.trim().is_empty()) {
            return Err(ValidationError::jobs("job_priorities contains an empty job type"));
        }

        self.migration.validate()
    }
}
