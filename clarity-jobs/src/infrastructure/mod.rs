//! Job routing infrastructure layer

pub mod job_backend;
pub mod sampler;

pub use job_backend::*;
pub use sampler::SeededSampler;
