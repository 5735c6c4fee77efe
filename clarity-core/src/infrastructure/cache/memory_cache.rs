//! In-memory tier using moka, with a tag index for bulk invalidation

use dashmap::DashMap;
use moka::Expiry;
use moka::future::Cache;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::types::CacheEntry;
use crate::infrastructure::rate_limiter::types::current_time_millis;

/// Expire each entry at its own `expires_at`
struct EntryExpiry;

impl Expiry<String, Arc<CacheEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.remaining_ttl(current_time_millis()))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining_ttl(current_time_millis()))
    }
}

/// Memory tier: bounded by approximate byte size, per-entry expiry.
///
/// Moka reclaims expired entries in the background, but callers still check
/// `expires_at` on every read. The tag index may hold keys moka has already
/// evicted; consumers confirm against the live entry before acting.
pub struct MemoryCache {
    cache: Cache<String, Arc<CacheEntry>>,
    tag_index: DashMap<String, HashSet<String>>,
}

impl MemoryCache {
    /// Create a new in-memory cache bounded to `max_size_mb`
    pub fn new(max_size_mb: u64) -> Self {
        let max_capacity = max_size_mb * 1024 * 1024; // Convert MB to bytes
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .weigher(|_key: &String, entry: &Arc<CacheEntry>| -> u32 {
                entry.size_bytes.min(u32::MAX as u64) as u32
            })
            .expire_after(EntryExpiry)
            .build();

        Self {
            cache,
            tag_index: DashMap::new(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.cache.get(key).await
    }

    /// Insert or replace an entry and index its tags.
    ///
    /// Callers must hold the key's write lock.
    pub async fn insert(&self, entry: Arc<CacheEntry>) {
        if let Some(previous) = self.cache.get(&entry.key).await {
            for tag in previous.tags.difference(&entry.tags) {
                self.unindex(tag, &entry.key);
            }
        }

        for tag in &entry.tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(entry.key.clone());
        }

        self.cache.insert(entry.key.clone(), entry).await;
    }

    /// Remove an entry and its index records.
    ///
    /// Callers must hold the key's write lock.
    pub async fn remove(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let removed = self.cache.remove(key).await;
        if let Some(entry) = &removed {
            for tag in &entry.tags {
                self.unindex(tag, key);
            }
        }
        removed
    }

    /// Detach a tag's index and return the keys it listed
    pub fn take_tag(&self, tag: &str) -> HashSet<String> {
        self.tag_index
            .remove(tag)
            .map(|(_, keys)| keys)
            .unwrap_or_default()
    }

    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.tag_index
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys of entries already past `expires_at`
    pub fn expired_keys(&self, now_ms: u64) -> Vec<String> {
        self.cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(now_ms))
            .map(|(key, _)| key.as_ref().clone())
            .collect()
    }

    /// Drop index records pointing at keys no longer cached
    pub fn prune_index(&self) -> usize {
        let mut pruned = 0;
        self.tag_index.retain(|_, keys| {
            let before = keys.len();
            keys.retain(|key| self.cache.contains_key(key));
            pruned += before - keys.len();
            !keys.is_empty()
        });
        pruned
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        self.tag_index.clear();
    }

    /// `(entry_count, weighted_size_bytes)` after pending maintenance
    pub async fn stats(&self) -> (u64, u64) {
        self.cache.run_pending_tasks().await;
        (self.cache.entry_count(), self.cache.weighted_size())
    }

    fn unindex(&self, tag: &str, key: &str) {
        if let Some(mut keys) = self.tag_index.get_mut(tag) {
            keys.remove(key);
        }
        self.tag_index.remove_if(tag, |_, keys| keys.is_empty());
    }
}
