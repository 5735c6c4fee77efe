//! Clarity Jobs - dual-backend job routing for the Clarity dashboard
//!
//! Background jobs live in one of two durable stores while the platform moves
//! from the legacy job table to the current priority queue. The router decides
//! where each new job goes, can migrate parked legacy jobs, and cancels jobs
//! wherever they live.
//!
//! # Architecture
//!
//! ```text
//! clarity-jobs/
//! ├── domain/           # JobItem, Backend, MigrationPolicy, ports
//! ├── application/
//! │   ├── router.rs     # JobRouter: enqueue, migrate, cancel, status
//! │   └── job_worker.rs # Worker pool draining both backends
//! └── infrastructure/
//!     ├── job_backend/  # In-memory and Dragonfly backends
//!     └── sampler.rs    # Seedable testing-mode sampler
//! ```
//!
//! # Routing
//!
//! | Mode | Target |
//! |------|--------|
//! | `immediate` | always current |
//! | `testing` | current for a sampled fraction, legacy otherwise |
//! | `gradual` | current when the job type's priority is eligible |

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{JobRouter, JobRouterError};
pub use domain::{Backend, JobItem};
