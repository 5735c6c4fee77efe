//! Job routing application layer

pub mod errors;
pub mod job_worker;
pub mod router;

pub use errors::JobRouterError;
pub use job_worker::{JobHandler, JobProcessingError, WorkerPoolConfig, spawn_job_worker_pool};
pub use router::{EnqueueReceipt, JobRouter, MigrationReport, MigrationStats, RouterStatus};
