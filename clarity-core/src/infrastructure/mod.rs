//! Infrastructure Layer - stores, limiters and resilience primitives
//!
//! Everything here talks to process memory or Dragonfly; nothing is specific
//! to a single caller.

pub mod cache;
pub mod rate_limiter;
pub mod resilience;

pub use cache::{CacheService, CacheSetOptions, CacheStats};
pub use rate_limiter::{RateLimitConfig, RateLimitResult, RateLimiterService};
pub use resilience::*;
