//! Configuration management

pub mod validation;

pub use validation::{Validate, ValidationError};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Circuit breaker configuration (serializable version)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfigSerializable {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from Open to HalfOpen (in seconds)
    pub recovery_timeout_seconds: u64,
    /// Maximum number of trial requests allowed in HalfOpen state
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfigSerializable {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
            half_open_max_requests: 1,
        }
    }
}

impl CircuitBreakerConfigSerializable {
    /// Convert to the runtime CircuitBreakerConfig
    pub fn to_circuit_breaker_config(
        &self,
    ) -> crate::infrastructure::resilience::CircuitBreakerConfig {
        crate::infrastructure::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_seconds),
            half_open_max_requests: self.half_open_max_requests,
        }
    }
}

/// Retry configuration (serializable version)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfigSerializable {
    /// Initial delay between operation retries (in milliseconds)
    pub initial_delay_ms: u64,
    /// Maximum delay between operation retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfigSerializable {
    fn default() -> Self {
        Self {
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfigSerializable {
    /// Convert to the runtime RetryConfig
    pub fn to_retry_config(&self) -> crate::infrastructure::resilience::RetryConfig {
        crate::infrastructure::resilience::RetryConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub rate_limit: RateLimiterConfig,
    pub cache: CacheConfig,
    pub jobs: JobsConfig,
}

/// Storage backend for rate limiting
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStorageBackend {
    /// Use Dragonfly/Redis so limits are shared across instances
    #[default]
    Dragonfly,
    /// Use in-memory storage (development or single instance)
    Memory,
}

/// What a rate-limit check reports when its store cannot be evaluated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InfraFailurePolicy {
    /// Admit the request and mark the result degraded
    #[default]
    FailOpen,
    /// Deny the request for one window
    FailClosed,
}

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub storage_backend: RateLimitStorageBackend,
    /// Dragonfly/Redis URL for the event-log store
    pub dragonfly_url: String,
    /// Timeout for a single storage round trip
    pub storage_timeout_ms: u64,
    /// Timeout for a single protected operation invocation
    pub operation_timeout_ms: u64,
    /// How often idle in-memory event logs are reclaimed
    pub cleanup_interval_seconds: u64,
    pub infra_failure_policy: InfraFailurePolicy,
    /// Attempts used by callers that do not pass their own budget
    pub default_max_retries: u32,
    pub circuit_breaker: CircuitBreakerConfigSerializable,
    pub retry: RetryConfigSerializable,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            storage_backend: RateLimitStorageBackend::Dragonfly,
            dragonfly_url: "redis://127.0.0.1:6379".to_string(),
            storage_timeout_ms: 250,
            operation_timeout_ms: 30_000,
            cleanup_interval_seconds: 300,
            infra_failure_policy: InfraFailurePolicy::FailOpen,
            default_max_retries: 3,
            circuit_breaker: CircuitBreakerConfigSerializable::default(),
            retry: RetryConfigSerializable::default(),
        }
    }
}

impl RateLimiterConfig {
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Storage tier a cache entry is written to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// Process memory only
    #[default]
    Memory,
    /// Process memory plus the shared persistent store
    Persistent,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Persistent => "persistent",
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied to values stored through a fallback loader
    pub default_ttl_seconds: u64,
    /// Tier applied to values stored through a fallback loader
    pub default_tier: CacheTier,
    /// Memory tier capacity in MB
    pub l1_cache_size_mb: u64,
    /// Enable the Dragonfly-backed persistent tier
    pub persistent_enabled: bool,
    /// Dragonfly DB connection URL (e.g., "redis://127.0.0.1:6379")
    pub dragonfly_url: String,
    /// Prefix for every key written to the persistent tier
    pub key_prefix: String,
    /// Timeout for a single persistent-tier round trip
    pub operation_timeout_ms: u64,
    /// Enable compression for persistent entries larger than threshold
    pub enable_cache_compression: bool,
    /// Compression threshold in bytes
    pub compression_threshold_bytes: u64,
    /// How often the memory tier is swept for expired entries
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
            default_tier: CacheTier::Memory,
            l1_cache_size_mb: 64,
            persistent_enabled: false,
            dragonfly_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "clarity:cache".to_string(),
            operation_timeout_ms: 250,
            enable_cache_compression: true,
            compression_threshold_bytes: 10240, // 10KB
            sweep_interval_seconds: 60,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Priority class of a background job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl JobPriority {
    pub const ALL: [JobPriority; 4] = [
        JobPriority::Low,
        JobPriority::Medium,
        JobPriority::High,
        JobPriority::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Medium => "medium",
            JobPriority::High => "high",
            JobPriority::Critical => "critical",
        }
    }

    /// Numeric rank, higher runs first
    pub fn rank(&self) -> u8 {
        match self {
            JobPriority::Low => 0,
            JobPriority::Medium => 1,
            JobPriority::High => 2,
            JobPriority::Critical => 3,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(JobPriority::Low),
            "medium" => Some(JobPriority::Medium),
            "high" => Some(JobPriority::High),
            "critical" => Some(JobPriority::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Phased-cutover routing mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// Route by priority-class eligibility
    #[default]
    Gradual,
    /// Route everything to the current backend
    Immediate,
    /// Route a sampled fraction to the current backend
    Testing,
}

impl MigrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationMode::Gradual => "gradual",
            MigrationMode::Immediate => "immediate",
            MigrationMode::Testing => "testing",
        }
    }
}

/// Storage backend for both job stores
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobBackendKind {
    #[default]
    Dragonfly,
    Memory,
}

/// Migration policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationPolicyConfig {
    pub enable_current_backend: bool,
    pub mode: MigrationMode,
    pub fallback_to_legacy: bool,
    /// Priority name ("low", "medium", "high", "critical") to eligibility
    pub priority_eligibility: HashMap<String, bool>,
    /// Fraction of jobs routed to the current backend in testing mode
    pub testing_sample_rate: f64,
    /// Fixed seed for the testing-mode sampler; entropy when unset
    pub sampling_seed: Option<u64>,
    /// Run the one-time legacy migration when the service starts
    pub migrate_on_startup: bool,
}

impl Default for MigrationPolicyConfig {
    fn default() -> Self {
        let priority_eligibility = HashMap::from([
            ("low".to_string(), true),
            ("medium".to_string(), true),
            ("high".to_string(), false),
            ("critical".to_string(), false),
        ]);

        Self {
            enable_current_backend: true,
            mode: MigrationMode::Gradual,
            fallback_to_legacy: true,
            priority_eligibility,
            testing_sample_rate: 0.1,
            sampling_seed: None,
            migrate_on_startup: false,
        }
    }
}

/// Job routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub backend: JobBackendKind,
    pub dragonfly_url: String,
    pub key_prefix: String,
    /// Timeout for a single backend round trip
    pub operation_timeout_ms: u64,
    /// Priority assigned to job types missing from `job_priorities`
    pub default_priority: JobPriority,
    pub job_priorities: HashMap<String, JobPriority>,
    pub worker_concurrency: usize,
    pub worker_poll_interval_ms: u64,
    pub max_job_attempts: u32,
    pub migration: MigrationPolicyConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        let job_priorities = HashMap::from([
            ("portfolio_sync".to_string(), JobPriority::High),
            ("price_refresh".to_string(), JobPriority::Critical),
            ("dividend_forecast".to_string(), JobPriority::Medium),
            ("tax_report".to_string(), JobPriority::Medium),
            ("email_digest".to_string(), JobPriority::Low),
        ]);

        Self {
            backend: JobBackendKind::Dragonfly,
            dragonfly_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "clarity:jobs".to_string(),
            operation_timeout_ms: 2_000,
            default_priority: JobPriority::Medium,
            job_priorities,
            worker_concurrency: 4,
            worker_poll_interval_ms: 1_000,
            max_job_attempts: 3,
            migration: MigrationPolicyConfig::default(),
        }
    }
}

impl JobsConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::Validate::validate(&self.logging)?;
        validation::Validate::validate(&self.rate_limit)?;
        validation::Validate::validate(&self.cache)?;
        validation::Validate::validate(&self.jobs)?;
        Ok(())
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        // Add environment-specific config if ENV is set
        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        // Local overrides and environment variables last (highest priority)
        builder = builder
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("CLARITY").separator("__"));

        let config: Config = builder.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),
}
