//! Tiered cache service
//!
//! Memory tier first, then the optional persistent tier. Entries carry their
//! own expiry and tags; an expired entry is never returned and is evicted on
//! the read that finds it. Persistent-tier faults are absorbed: they are
//! logged and the cache keeps serving from memory.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dragonfly_cache::DragonflyCacheStore;
use super::memory_cache::MemoryCache;
use super::persistent::PersistentCacheStore;
use super::types::{CacheEntry, CacheSetOptions, CacheStats};
use crate::application::errors::{CacheError, StorageError, with_timeout};
use crate::config::{CacheConfig, CacheTier};
use crate::infrastructure::rate_limiter::types::current_time_millis;

const WRITE_LOCK_STRIPES: usize = 64;

/// Tiered key/value cache with TTL and tag invalidation
pub struct CacheService {
    memory: MemoryCache,
    persistent: Option<Arc<dyn PersistentCacheStore>>,
    /// Serializes writes per key; reads never take these
    write_locks: Vec<Mutex<()>>,
    hits: AtomicU64,
    misses: AtomicU64,
    config: CacheConfig,
}

impl CacheService {
    /// Create the cache, connecting the persistent tier when enabled.
    ///
    /// An unreachable Dragonfly at startup leaves the cache memory-only.
    pub async fn new(config: CacheConfig) -> Self {
        let persistent: Option<Arc<dyn PersistentCacheStore>> = if config.persistent_enabled {
            match DragonflyCacheStore::new(
                &config.dragonfly_url,
                &config.key_prefix,
                config.enable_cache_compression,
                config.compression_threshold_bytes,
            )
            .await
            {
                Ok(store) => {
                    info!(
                        "Cache persistent tier using Dragonfly at {}",
                        config.dragonfly_url
                    );
                    Some(Arc::new(store))
                }
                Err(e) => {
                    warn!(
                        "Failed to connect persistent cache tier, continuing memory-only: {}",
                        e
                    );
                    None
                }
            }
        } else {
            info!("Cache running memory-only");
            None
        };

        Self::with_persistent(config, persistent)
    }

    /// Create with an explicit persistent tier (or none)
    pub fn with_persistent(
        config: CacheConfig,
        persistent: Option<Arc<dyn PersistentCacheStore>>,
    ) -> Self {
        Self {
            memory: MemoryCache::new(config.l1_cache_size_mb),
            persistent,
            write_locks: (0..WRITE_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            config,
        }
    }

    /// Default write options from configuration
    pub fn default_options(&self) -> CacheSetOptions {
        CacheSetOptions::loader_default(self.config.default_ttl(), self.config.default_tier)
    }

    /// Look up `key`, memory tier first.
    ///
    /// A value that no longer deserializes as `T` counts as a miss and is evicted.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let now = current_time_millis();

        if let Some(entry) = self.memory.get(key).await {
            if entry.is_expired(now) {
                debug!(key = %key, "Memory tier entry expired");
                self.evict_if_current(key, &entry).await;
            } else {
                match serde_json::from_value::<T>(entry.value.clone()) {
                    Ok(value) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        debug!(key = %key, tier = "memory", "Cache hit");
                        return Some(value);
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Cached value has unexpected shape, evicting");
                        self.evict_if_current(key, &entry).await;
                    }
                }
            }
        }

        if let Some((entry, bytes)) = self.persistent_lookup(key, now).await {
            match serde_json::from_value::<T>(entry.value.clone()) {
                Ok(value) => {
                    self.promote(entry).await;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, tier = "persistent", "Cache hit");
                    return Some(value);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Persisted value has unexpected shape, evicting");
                    self.evict_persistent_if_current(key, &bytes).await;
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Cache miss");
        None
    }

    /// Look up `key`; on a miss run `loader`, cache its value with the
    /// default TTL and tier, and return it.
    ///
    /// Loader errors are returned unchanged and nothing is cached.
    pub async fn get_or_load<T, E, F, Fut>(&self, key: &str, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_load_with(key, self.default_options(), loader)
            .await
    }

    /// [`Self::get_or_load`] with explicit write options
    pub async fn get_or_load_with<T, E, F, Fut>(
        &self,
        key: &str,
        options: CacheSetOptions,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key).await {
            return Ok(value);
        }

        let value = loader().await?;
        if let Err(e) = self.set(key, &value, options).await {
            warn!(key = %key, error = %e, "Loaded value could not be cached");
        }
        Ok(value)
    }

    /// Write `value` with `expires_at = now + ttl` and index its tags
    pub async fn set<T>(&self, key: &str, value: &T, options: CacheSetOptions) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(value)?;
        let tier = options.tier();
        let ttl = options.ttl();
        let entry = Arc::new(CacheEntry::new(key, value, &options, current_time_millis()));

        let _guard = self.lock_for(key).lock().await;

        match (tier, &self.persistent) {
            (CacheTier::Persistent, Some(_)) => {
                let bytes = serde_json::to_vec(entry.as_ref())?;
                let tags: Vec<String> = entry.tags.iter().cloned().collect();
                self.persistent_call(key, "set", |store| async move {
                    store.set(key, bytes, ttl, &tags).await
                })
                .await;
            }
            (CacheTier::Persistent, None) => {
                debug!(key = %key, "Persistent tier not configured, writing to memory only");
            }
            // A memory-tier write must not leave an older persistent copy to resurface
            (CacheTier::Memory, Some(_)) => self.persistent_delete(key).await,
            (CacheTier::Memory, None) => {}
        }

        self.memory.insert(entry).await;
        debug!(key = %key, tier = tier.as_str(), "Cache entry stored");
        Ok(())
    }

    /// Remove one key from every tier
    pub async fn invalidate(&self, key: &str) {
        let _guard = self.lock_for(key).lock().await;
        self.memory.remove(key).await;
        self.persistent_delete(key).await;
    }

    /// Remove every entry carrying any of `tags`. Returns the number of keys removed.
    ///
    /// An indexed key is only removed if its live entry still carries the tag.
    pub async fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let mut removed = 0;

        for tag in tags {
            let tag = tag.as_ref();
            let mut keys: HashSet<String> = self.memory.take_tag(tag);

            if self.persistent.is_some() {
                let persisted = self
                    .persistent_call(tag, "keys_for_tag", |store| async move {
                        store.keys_for_tag(tag).await
                    })
                    .await
                    .unwrap_or_default();
                keys.extend(persisted);
            }

            for key in &keys {
                if self.invalidate_tagged(key, tag).await {
                    removed += 1;
                }
            }

            if self.persistent.is_some() {
                self.persistent_call(tag, "delete_tag", |store| async move {
                    store.delete_tag(tag).await
                })
                .await;
            }

            debug!(tag = %tag, candidates = keys.len(), "Invalidated tag");
        }

        info!(tags = tags.len(), removed, "Cache invalidated by tags");
        removed
    }

    async fn invalidate_tagged(&self, key: &str, tag: &str) -> bool {
        let _guard = self.lock_for(key).lock().await;
        let mut removed = false;

        if let Some(entry) = self.memory.get(key).await
            && entry.has_tag(tag)
        {
            self.memory.remove(key).await;
            removed = true;
        }

        // Caller holds the stripe lock, so stale records are deleted directly
        if let Some((_, entry)) = self.persistent_read(key, current_time_millis()).await {
            match entry {
                Some(entry) if !entry.has_tag(tag) => {}
                Some(_) => {
                    self.persistent_delete(key).await;
                    removed = true;
                }
                None => self.persistent_delete(key).await,
            }
        }

        removed
    }

    /// Cumulative counters since start or the last [`Self::clear_all`]
    pub async fn get_stats(&self) -> CacheStats {
        let (total_keys, memory_usage_bytes) = self.memory.stats().await;
        CacheStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            memory_usage_bytes,
            total_keys,
        )
    }

    /// Remove every entry and reset counters (test/admin use)
    pub async fn clear_all(&self) {
        self.memory.clear().await;
        if self.persistent.is_some() {
            self.persistent_call("*", "clear", |store| async move { store.clear().await })
                .await;
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        info!("Cache cleared");
    }

    /// Evict expired memory entries and prune stale tag index records.
    /// Returns the number of entries evicted.
    pub async fn cleanup_expired(&self) -> usize {
        let now = current_time_millis();
        let mut evicted = 0;

        for key in self.memory.expired_keys(now) {
            let _guard = self.lock_for(&key).lock().await;
            if let Some(entry) = self.memory.get(&key).await
                && entry.is_expired(now)
            {
                self.memory.remove(&key).await;
                evicted += 1;
            }
        }

        let pruned = self.memory.prune_index();
        if evicted > 0 || pruned > 0 {
            debug!(evicted, pruned, "Cache sweep completed");
        }
        evicted
    }

    /// Periodically run [`Self::cleanup_expired`] until `shutdown` fires
    pub fn start_sweep_task(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let sweep_interval = Duration::from_secs(self.config.sweep_interval_seconds);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Cache sweep task stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        service.cleanup_expired().await;
                    }
                }
            }
        })
    }

    pub fn has_persistent_tier(&self) -> bool {
        self.persistent.is_some()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock_for(&self, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.write_locks[(hasher.finish() as usize) % WRITE_LOCK_STRIPES]
    }

    /// Evict `key` only if the memory tier still holds `seen`
    async fn evict_if_current(&self, key: &str, seen: &Arc<CacheEntry>) {
        let _guard = self.lock_for(key).lock().await;
        if let Some(current) = self.memory.get(key).await
            && Arc::ptr_eq(&current, seen)
        {
            self.memory.remove(key).await;
        }
    }

    async fn promote(&self, entry: CacheEntry) {
        let key = entry.key.clone();
        let _guard = self.lock_for(&key).lock().await;
        // A concurrent write already refreshed the memory tier
        if self.memory.get(&key).await.is_some() {
            return;
        }
        self.memory.insert(Arc::new(entry)).await;
    }

    /// Live persisted entry for `key` with the raw record it was decoded from.
    /// Expired or corrupt records are evicted unless a writer replaced them.
    async fn persistent_lookup(&self, key: &str, now: u64) -> Option<(CacheEntry, Vec<u8>)> {
        let (bytes, entry) = self.persistent_read(key, now).await?;
        match entry {
            Some(entry) => Some((entry, bytes)),
            None => {
                self.evict_persistent_if_current(key, &bytes).await;
                None
            }
        }
    }

    /// Raw persisted record for `key`, decoded when it is live
    async fn persistent_read(&self, key: &str, now: u64) -> Option<(Vec<u8>, Option<CacheEntry>)> {
        let bytes = self
            .persistent_call(key, "get", |store| async move { store.get(key).await })
            .await
            .flatten()?;

        let entry = match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.is_expired(now) => None,
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = %key, error = %e, "Persisted cache entry is corrupt, evicting");
                None
            }
        };
        Some((bytes, entry))
    }

    /// Delete the persisted record for `key` only if it still equals `seen`
    async fn evict_persistent_if_current(&self, key: &str, seen: &[u8]) {
        let _guard = self.lock_for(key).lock().await;
        let current = self
            .persistent_call(key, "get", |store| async move { store.get(key).await })
            .await
            .flatten();

        if current.as_deref() == Some(seen) {
            self.persistent_delete(key).await;
        } else {
            debug!(key = %key, "Persisted entry replaced concurrently, keeping it");
        }
    }

    async fn persistent_delete(&self, key: &str) {
        if self.persistent.is_some() {
            self.persistent_call(key, "delete", |store| async move { store.delete(key).await })
                .await;
        }
    }

    /// Run a persistent-tier call under the operation timeout, logging and
    /// absorbing any failure.
    async fn persistent_call<'a, T, F, Fut>(&'a self, key: &str, operation: &str, call: F) -> Option<T>
    where
        F: FnOnce(&'a dyn PersistentCacheStore) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let store = self.persistent.as_deref()?;

        match with_timeout(self.config.operation_timeout(), call(store)).await {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(
                    key = %key,
                    operation,
                    store = store.name(),
                    category = %error.category(),
                    error = %error,
                    "Persistent cache tier degraded"
                );
                None
            }
        }
    }
}
