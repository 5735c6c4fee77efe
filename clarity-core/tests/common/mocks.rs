//! Failing and hanging stores for clarity-core tests

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use clarity_core::application::StorageError;
use clarity_core::infrastructure::cache::{InMemoryPersistentStore, PersistentCacheStore};
use clarity_core::infrastructure::rate_limiter::{RateLimitStorage, WindowSnapshot};

/// Rate-limit store that is always down
#[derive(Default)]
pub struct FailingRateLimitStorage {
    pub calls: AtomicUsize,
}

impl FailingRateLimitStorage {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Unavailable("connection refused".to_string()))
    }
}

#[async_trait]
impl RateLimitStorage for FailingRateLimitStorage {
    async fn try_acquire(
        &self,
        _identifier: &str,
        _now_ms: u64,
        _window_ms: u64,
        _limit: u32,
    ) -> Result<WindowSnapshot, StorageError> {
        self.fail()
    }

    async fn peek(
        &self,
        _identifier: &str,
        _now_ms: u64,
        _window_ms: u64,
    ) -> Result<WindowSnapshot, StorageError> {
        self.fail()
    }

    async fn delete(&self, _identifier: &str) -> Result<(), StorageError> {
        self.fail()
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.fail()
    }

    async fn cleanup(&self, _now_ms: u64) {}
}

/// Rate-limit store that never answers
pub struct SlowRateLimitStorage(pub Duration);

#[async_trait]
impl RateLimitStorage for SlowRateLimitStorage {
    async fn try_acquire(
        &self,
        _identifier: &str,
        _now_ms: u64,
        _window_ms: u64,
        _limit: u32,
    ) -> Result<WindowSnapshot, StorageError> {
        tokio::time::sleep(self.0).await;
        Ok(WindowSnapshot::empty())
    }

    async fn peek(
        &self,
        _identifier: &str,
        _now_ms: u64,
        _window_ms: u64,
    ) -> Result<WindowSnapshot, StorageError> {
        tokio::time::sleep(self.0).await;
        Ok(WindowSnapshot::empty())
    }

    async fn delete(&self, _identifier: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn cleanup(&self, _now_ms: u64) {}
}

/// Persistent cache tier that is always down
#[derive(Default)]
pub struct FailingPersistentStore {
    pub calls: AtomicUsize,
}

impl FailingPersistentStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Unavailable("connection reset".to_string()))
    }
}

#[async_trait]
impl PersistentCacheStore for FailingPersistentStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.fail()
    }

    async fn set(
        &self,
        _key: &str,
        _value: Vec<u8>,
        _ttl: Duration,
        _tags: &[String],
    ) -> Result<(), StorageError> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
        self.fail()
    }

    async fn keys_for_tag(&self, _tag: &str) -> Result<Vec<String>, StorageError> {
        self.fail()
    }

    async fn delete_tag(&self, _tag: &str) -> Result<(), StorageError> {
        self.fail()
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.fail()
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Persistent tier whose first read parks after fetching its value until
/// [`GatedPersistentStore::release`] is called
pub struct GatedPersistentStore {
    inner: Arc<InMemoryPersistentStore>,
    gate_armed: AtomicBool,
    parked: Notify,
    released: Notify,
}

impl GatedPersistentStore {
    pub fn new(inner: Arc<InMemoryPersistentStore>) -> Self {
        Self {
            inner,
            gate_armed: AtomicBool::new(true),
            parked: Notify::new(),
            released: Notify::new(),
        }
    }

    /// Resolves once the gated read holds its value
    pub async fn wait_parked(&self) {
        self.parked.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl PersistentCacheStore for GatedPersistentStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self.inner.get(key).await?;
        if self.gate_armed.swap(false, Ordering::SeqCst) {
            self.parked.notify_one();
            self.released.notified().await;
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
        self.inner.set(key, value, ttl, tags).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }

    async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>, StorageError> {
        self.inner.keys_for_tag(tag).await
    }

    async fn delete_tag(&self, tag: &str) -> Result<(), StorageError> {
        self.inner.delete_tag(tag).await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.inner.clear().await
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}
