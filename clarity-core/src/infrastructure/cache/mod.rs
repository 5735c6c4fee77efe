//! Tiered caching
//!
//! A byte-bounded moka memory tier in front of an optional Dragonfly
//! persistent tier. Entries expire on their own TTL and can be invalidated
//! in bulk by tag.

pub mod dragonfly_cache;
pub mod memory_cache;
pub mod persistent;
pub mod service;
pub mod types;

pub use dragonfly_cache::DragonflyCacheStore;
pub use memory_cache::MemoryCache;
pub use persistent::{InMemoryPersistentStore, PersistentCacheStore};
pub use service::CacheService;
pub use types::{CacheEntry, CacheSetOptions, CacheStats};
