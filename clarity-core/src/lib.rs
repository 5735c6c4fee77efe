//! Clarity Core - resource governance for the Clarity finance dashboard
//!
//! This crate holds the pieces every Clarity process shares:
//!
//! # Modules
//!
//! - [`config`] - Strongly-typed configuration with TOML and environment variable support
//! - [`application`] - Error types shared by the governance services
//! - [`infrastructure`] - Rate limiter, tiered cache and circuit breakers
//! - [`logging`] - Structured logging with tracing
//!
//! # Architecture
//!
//! ```text
//! clarity-core/
//! ├── application/      # Error taxonomy
//! ├── infrastructure/
//! │   ├── rate_limiter/ # Sliding window, breakers, batch execution
//! │   ├── cache/        # moka memory tier + Dragonfly persistent tier
//! │   └── resilience.rs # Circuit breaker and retry backoff
//! └── config/           # Configuration management
//! ```
//!
//! # Configuration
//!
//! ```rust,ignore
//! use clarity_core::Config;
//!
//! let config = Config::load()?;
//! ```
//!
//! Environment variables use the `CLARITY__` prefix with double underscore separators:
//!
//! ```bash
//! CLARITY__RATE_LIMIT__STORAGE_BACKEND=memory
//! CLARITY__CACHE__DEFAULT_TTL_SECONDS=600
//! ```

pub mod application;
pub mod config;
pub mod infrastructure;
pub mod logging;

pub use config::Config;
pub use logging::init_tracing;
