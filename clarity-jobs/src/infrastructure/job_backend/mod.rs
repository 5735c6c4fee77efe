//! Job backend implementations

pub mod dragonfly;
pub mod memory;

pub use dragonfly::DragonflyJobBackend;
pub use memory::InMemoryJobBackend;
