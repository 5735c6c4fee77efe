//! Job routing domain layer

pub mod entities;
pub mod services;
pub mod value_objects;

pub use entities::*;
pub use services::*;
pub use value_objects::*;

pub use clarity_core::config::{JobPriority, MigrationMode};
