//! Rate Limiting Infrastructure
//!
//! This module provides per-identifier admission control with:
//! - Sliding-window log algorithm (no boundary bursts)
//! - Atomic trim + count + append per identifier, in memory or in Dragonfly
//! - Explicit fail-open/fail-closed policy for store outages
//! - Per-identifier circuit breakers around the protected operation
//! - Semaphore-bounded batch execution sharing one budget

pub mod batch;
pub mod service;
pub mod sliding_window;
pub mod storage;
pub mod types;

pub use batch::{BatchItem, BatchOptions, BatchResults};
pub use service::RateLimiterService;
pub use storage::{DragonflyRateLimitStorage, InMemoryRateLimitStorage, RateLimitStorage};
pub use types::{
    AdmissionDecision, RateLimitConfig, RateLimitResult, RateLimitStatus, WindowSnapshot,
};
