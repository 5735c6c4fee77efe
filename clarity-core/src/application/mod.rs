//! Application layer - error types shared by the governance services

pub mod errors;

pub use errors::{CacheError, ErrorCategory, ExecuteError, StorageError};
