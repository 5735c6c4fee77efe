//! Persistent (second) cache tier port and an in-process implementation

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Duration;

use crate::application::errors::StorageError;
use crate::infrastructure::rate_limiter::types::current_time_millis;

/// Shared key/value store behind the memory tier.
///
/// Values are opaque bytes; expiry is enforced by the store, tags are kept as
/// `tag -> keys` sets.
#[async_trait]
pub trait PersistentCacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        tags: &[String],
    ) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>, StorageError>;

    async fn delete_tag(&self, tag: &str) -> Result<(), StorageError>;

    async fn clear(&self) -> Result<(), StorageError>;

    fn name(&self) -> &'static str;
}

/// Persistent-tier stand-in living in process memory (tests, single node)
#[derive(Default)]
pub struct InMemoryPersistentStore {
    values: DashMap<String, (Vec<u8>, u64)>,
    tags: DashMap<String, HashSet<String>>,
}

impl InMemoryPersistentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl PersistentCacheStore for InMemoryPersistentStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let now = current_time_millis();
        let value = self.values.get(key).and_then(|entry| {
            let (bytes, expires_at) = entry.value();
            (now < *expires_at).then(|| bytes.clone())
        });

        if value.is_none() {
            self.values.remove_if(key, |_, (_, expires_at)| now >= *expires_at);
        }
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        tags: &[String],
    ) -> Result<(), StorageError> {
        let expires_at = current_time_millis().saturating_add(ttl.as_millis() as u64);
        self.values.insert(key.to_string(), (value, expires_at));

        for tag in tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.values.remove(key);
        Ok(())
    }

    async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .tags
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_tag(&self, tag: &str) -> Result<(), StorageError> {
        self.tags.remove(tag);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.values.clear();
        self.tags.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
