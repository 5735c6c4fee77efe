//! Clarity Governance - application library
//!
//! Wires the rate limiter, tiered cache and job router from `clarity-core`
//! and `clarity-jobs` into one process and runs their background workers.

mod app;
pub mod workers;

pub use app::{AppError, AppHandle, create_app};
pub use clarity_core::{Config, init_tracing};

// Re-export for convenience
pub use clarity_core;
pub use clarity_jobs;
