//! Resilience patterns for rate-limited operations

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::rate_limiter::types::current_time_millis;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed through
    Closed,
    /// Circuit is open, requests are rejected immediately
    Open,
    /// Circuit is half-open, allowing limited trial requests
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from Open to HalfOpen
    pub recovery_timeout: Duration,
    /// Maximum number of trial requests allowed in HalfOpen state
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_requests: 1,
        }
    }
}

/// Point-in-time view of a breaker, for status endpoints and logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Unix timestamp (ms) at which the circuit last opened
    pub opened_at: Option<u64>,
}

impl Default for CircuitSnapshot {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Circuit breaker guarding one identifier's operation.
///
/// **State Machine:**
/// ```text
///    ┌─────────────┐  failures >= threshold   ┌──────────────┐
///    │   CLOSED    │ ───────────────────────► │     OPEN     │
///    └─────────────┘                          └──────────────┘
///           ▲                                   │         ▲
///           │ trial success     cooldown elapsed│         │ trial failure
///           │                                   ▼         │
///           │                            ┌──────────────┐ │
///           └─────────────────────────── │  HALF_OPEN   │─┘
///                                        └──────────────┘
/// ```
///
/// The breaker does not run the operation itself: callers ask
/// [`CircuitBreaker::try_acquire`] before invoking and report the outcome with
/// [`CircuitBreaker::on_success`] / [`CircuitBreaker::on_failure`].
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
}

#[derive(Debug)]
struct CircuitBreakerState {
    current_state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_millis: Option<u64>,
    half_open_requests: u32,
}

impl CircuitBreakerState {
    fn closed() -> Self {
        Self {
            current_state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            opened_at_millis: None,
            half_open_requests: 0,
        }
    }

    fn open(&mut self) {
        self.current_state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.opened_at_millis = Some(current_time_millis());
        self.half_open_requests = 0;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CircuitBreakerState::closed()),
        }
    }

    /// Check whether a call may proceed, moving Open to HalfOpen once the
    /// cooldown has elapsed.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;

        match state.current_state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = state
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.config.recovery_timeout);
                if cooled_down {
                    state.current_state = CircuitState::HalfOpen;
                    // This caller is the first trial request
                    state.half_open_requests = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_requests < self.config.half_open_max_requests {
                    state.half_open_requests += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub async fn on_success(&self) {
        let mut state = self.state.lock().await;

        match state.current_state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                *state = CircuitBreakerState::closed();
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late;
                // the open decision stands until a trial succeeds.
            }
        }
    }

    /// Record a failed call. Returns the state after the transition.
    pub async fn on_failure(&self) -> CircuitState {
        let mut state = self.state.lock().await;

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        match state.current_state {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.open();
                }
            }
            CircuitState::HalfOpen => {
                state.open();
            }
            CircuitState::Open => {}
        }

        state.current_state
    }

    /// Get current circuit breaker state
    pub async fn get_state(&self) -> CircuitState {
        self.state.lock().await.current_state
    }

    /// Get current consecutive failure count
    pub async fn get_failure_count(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }

    pub async fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock().await;
        CircuitSnapshot {
            state: state.current_state,
            consecutive_failures: state.consecutive_failures,
            opened_at: state.opened_at_millis,
        }
    }

    /// Reset the circuit breaker to closed state
    pub async fn reset(&self) {
        *self.state.lock().await = CircuitBreakerState::closed();
    }
}

/// Lazily-populated set of breakers, one per identifier.
///
/// Breakers never share state, so a failing identifier cannot trip another.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Get the breaker for an identifier, creating a closed one on first use
    pub fn get_or_create(&self, identifier: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(identifier) {
            return Arc::clone(existing.value());
        }

        let breaker = self
            .breakers
            .entry(identifier.to_string())
            .or_insert_with(|| {
                debug!(identifier = %identifier, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(self.config.clone()))
            });
        Arc::clone(breaker.value())
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .get(identifier)
            .map(|breaker| Arc::clone(breaker.value()))
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Drop every breaker (administrative reset)
    pub fn clear(&self) {
        let count = self.breakers.len();
        self.breakers.clear();
        if count > 0 {
            warn!(breakers = count, "Circuit breaker registry cleared");
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

/// Backoff configuration for operation retries
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}
