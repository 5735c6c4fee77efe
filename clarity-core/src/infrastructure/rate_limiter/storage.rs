//! Rate Limit Storage Backends
//!
//! Provides storage implementations for the sliding-window event log:
//! - Dragonfly/Redis for distributed, production use
//! - In-memory for development and single-instance deployments
//!
//! Both backends perform trim + count + append as one atomic step per
//! identifier; concurrent bursts can never over-admit.

use super::types::WindowSnapshot;
use crate::application::errors::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Trait for rate limit storage backends
#[async_trait]
pub trait RateLimitStorage: Send + Sync {
    /// Drop events at or before `now_ms - window_ms`, then append `now_ms`
    /// when fewer than `limit` events remain. Atomic per identifier.
    async fn try_acquire(
        &self,
        identifier: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
    ) -> Result<WindowSnapshot, StorageError>;

    /// Read the window without appending
    async fn peek(
        &self,
        identifier: &str,
        now_ms: u64,
        window_ms: u64,
    ) -> Result<WindowSnapshot, StorageError>;

    /// Delete one identifier's log
    async fn delete(&self, identifier: &str) -> Result<(), StorageError>;

    /// Delete every log
    async fn clear(&self) -> Result<(), StorageError>;

    /// Reclaim logs whose events have all expired (for in-memory storage)
    async fn cleanup(&self, now_ms: u64);
}

/// Lua script doing trim, count, conditional append and expiry in one round trip.
/// Returns `{admitted, count, oldest_score}` with `oldest_score = -1` for an empty set.
const ACQUIRE_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local admitted = 0
if count < limit then
  redis.call('ZADD', key, now, member)
  count = count + 1
  admitted = 1
end
redis.call('PEXPIRE', key, window)

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_score = -1
if oldest[2] then
  oldest_score = tonumber(oldest[2])
end
return {admitted, count, oldest_score}
"#;

const PEEK_SCRIPT: &str = r#"
local key = KEYS[1]
local floor = '(' .. (tonumber(ARGV[1]) - tonumber(ARGV[2]))

local count = redis.call('ZCOUNT', key, floor, '+inf')
local oldest = redis.call('ZRANGEBYSCORE', key, floor, '+inf', 'WITHSCORES', 'LIMIT', 0, 1)
local oldest_score = -1
if oldest[2] then
  oldest_score = tonumber(oldest[2])
end
return {0, count, oldest_score}
"#;

/// Dragonfly/Redis storage backend: one sorted set per identifier, scored by
/// event timestamp.
pub struct DragonflyRateLimitStorage {
    connection_manager: Arc<ConnectionManager>,
    key_prefix: String,
    acquire_script: redis::Script,
    peek_script: redis::Script,
}

impl DragonflyRateLimitStorage {
    /// Create a new Dragonfly storage backend
    pub async fn new(url: &str, key_prefix: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!("Failed to create Redis client for rate limiting: {}", e);
            StorageError::Unavailable(format!("Failed to create Redis client: {}", e))
        })?;

        let connection_manager = ConnectionManager::new(client).await.map_err(|e| {
            warn!(
                "Failed to create connection manager for rate limiting: {}",
                e
            );
            StorageError::Unavailable(format!("Failed to create connection manager: {}", e))
        })?;

        // Test connection
        let mut conn = connection_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| {
                warn!("Failed to ping Redis for rate limiting: {}", e);
                StorageError::Unavailable(format!("Failed to ping Redis: {}", e))
            })?;

        debug!("Successfully connected to Dragonfly for rate limiting");

        Ok(Self {
            connection_manager: Arc::new(connection_manager),
            key_prefix: key_prefix.to_string(),
            acquire_script: redis::Script::new(ACQUIRE_SCRIPT),
            peek_script: redis::Script::new(PEEK_SCRIPT),
        })
    }

    fn key(&self, identifier: &str) -> String {
        window_key(&self.key_prefix, identifier)
    }
}

/// Redis key holding an identifier's event log
pub fn window_key(prefix: &str, identifier: &str) -> String {
    format!("{}:{}", prefix, identifier)
}

/// Convert the `{admitted, count, oldest}` triple returned by the scripts
pub fn snapshot_from_script(admitted: i64, count: i64, oldest: i64) -> WindowSnapshot {
    WindowSnapshot {
        admitted: admitted == 1,
        count: count.clamp(0, u32::MAX as i64) as u32,
        oldest_ms: (oldest >= 0).then_some(oldest as u64),
    }
}

#[async_trait]
impl RateLimitStorage for DragonflyRateLimitStorage {
    async fn try_acquire(
        &self,
        identifier: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
    ) -> Result<WindowSnapshot, StorageError> {
        let mut conn = (*self.connection_manager).clone();
        let member = format!("{}-{}", now_ms, Uuid::new_v4());

        let (admitted, count, oldest): (i64, i64, i64) = self
            .acquire_script
            .key(self.key(identifier))
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        Ok(snapshot_from_script(admitted, count, oldest))
    }

    async fn peek(
        &self,
        identifier: &str,
        now_ms: u64,
        window_ms: u64,
    ) -> Result<WindowSnapshot, StorageError> {
        let mut conn = (*self.connection_manager).clone();

        let (admitted, count, oldest): (i64, i64, i64) = self
            .peek_script
            .key(self.key(identifier))
            .arg(now_ms)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(snapshot_from_script(admitted, count, oldest))
    }

    async fn delete(&self, identifier: &str) -> Result<(), StorageError> {
        let mut conn = (*self.connection_manager).clone();

        redis::cmd("DEL")
            .arg(self.key(identifier))
            .query_async::<i64>(&mut conn)
            .await?;

        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut conn = (*self.connection_manager).clone();
        let pattern = format!("{}:*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut deleted: usize = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                deleted += keys.len();
                redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<i64>(&mut conn)
                    .await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(deleted, "Cleared rate limit windows");
        Ok(())
    }

    async fn cleanup(&self, _now_ms: u64) {
        // PEXPIRE on every admission handles cleanup
    }
}

/// Ordered log of admitted-event timestamps for one identifier
#[derive(Debug, Default)]
struct EventLog {
    timestamps: VecDeque<u64>,
    /// Window of the most recent acquire, used by cleanup
    window_ms: u64,
}

impl EventLog {
    fn trim(&mut self, now_ms: u64, window_ms: u64) {
        while let Some(&oldest) = self.timestamps.front() {
            if oldest.saturating_add(window_ms) <= now_ms {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn snapshot(&self, admitted: bool) -> WindowSnapshot {
        WindowSnapshot {
            admitted,
            count: self.timestamps.len() as u32,
            oldest_ms: self.timestamps.front().copied(),
        }
    }
}

/// In-memory storage backend for development/single instance.
///
/// The map shard lock is held only long enough to fetch an identifier's log;
/// the log's own mutex serializes its read-modify-write.
#[derive(Default)]
pub struct InMemoryRateLimitStorage {
    logs: DashMap<String, Arc<Mutex<EventLog>>>,
}

impl InMemoryRateLimitStorage {
    /// Create a new in-memory storage backend
    pub fn new() -> Self {
        Self::default()
    }

    fn log_for(&self, identifier: &str) -> Arc<Mutex<EventLog>> {
        if let Some(existing) = self.logs.get(identifier) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.logs
                .entry(identifier.to_string())
                .or_default()
                .value(),
        )
    }

    /// Number of identifiers with a live log
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

#[async_trait]
impl RateLimitStorage for InMemoryRateLimitStorage {
    async fn try_acquire(
        &self,
        identifier: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
    ) -> Result<WindowSnapshot, StorageError> {
        let log = self.log_for(identifier);
        let mut log = log.lock().map_err(|_| StorageError::Poisoned {
            key: identifier.to_string(),
        })?;

        log.trim(now_ms, window_ms);
        log.window_ms = window_ms;

        if log.timestamps.len() < limit as usize {
            log.timestamps.push_back(now_ms);
            Ok(log.snapshot(true))
        } else {
            Ok(log.snapshot(false))
        }
    }

    async fn peek(
        &self,
        identifier: &str,
        now_ms: u64,
        window_ms: u64,
    ) -> Result<WindowSnapshot, StorageError> {
        let Some(log) = self.logs.get(identifier).map(|log| Arc::clone(log.value())) else {
            return Ok(WindowSnapshot::empty());
        };

        let log = log.lock().map_err(|_| StorageError::Poisoned {
            key: identifier.to_string(),
        })?;

        let mut live = log
            .timestamps
            .iter()
            .copied()
            .filter(|&ts| ts.saturating_add(window_ms) > now_ms);
        let oldest_ms = live.next();
        let count = oldest_ms.map_or(0, |_| 1 + live.count() as u32);

        Ok(WindowSnapshot {
            admitted: false,
            count,
            oldest_ms,
        })
    }

    async fn delete(&self, identifier: &str) -> Result<(), StorageError> {
        self.logs.remove(identifier);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.logs.clear();
        Ok(())
    }

    async fn cleanup(&self, now_ms: u64) {
        let before = self.logs.len();

        self.logs.retain(|_, log| match log.try_lock() {
            Ok(mut log) => {
                let window_ms = log.window_ms;
                log.trim(now_ms, window_ms);
                !log.timestamps.is_empty()
            }
            // Busy or poisoned: leave it for the next pass
            Err(_) => true,
        });

        debug!(
            removed = before.saturating_sub(self.logs.len()),
            "Completed rate limit storage cleanup"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_admits_up_to_limit() {
        let storage = InMemoryRateLimitStorage::new();

        let first = storage.try_acquire("u1", 1_000, 1_000, 2).await.unwrap();
        assert!(first.admitted);
        assert_eq!(first.count, 1);
        assert_eq!(first.oldest_ms, Some(1_000));

        let second = storage.try_acquire("u1", 1_100, 1_000, 2).await.unwrap();
        assert!(second.admitted);
        assert_eq!(second.count, 2);

        let third = storage.try_acquire("u1", 1_200, 1_000, 2).await.unwrap();
        assert!(!third.admitted);
        assert_eq!(third.count, 2);
        assert_eq!(third.oldest_ms, Some(1_000));
    }

    #[tokio::test]
    async fn test_in_memory_window_slides() {
        let storage = InMemoryRateLimitStorage::new();

        storage.try_acquire("u1", 1_000, 1_000, 1).await.unwrap();
        assert!(!storage.try_acquire("u1", 1_999, 1_000, 1).await.unwrap().admitted);

        // The first event leaves the window exactly one window later
        let later = storage.try_acquire("u1", 2_000, 1_000, 1).await.unwrap();
        assert!(later.admitted);
        assert_eq!(later.oldest_ms, Some(2_000));
    }

    #[tokio::test]
    async fn test_in_memory_identifiers_are_independent() {
        let storage = InMemoryRateLimitStorage::new();

        storage.try_acquire("a", 0, 60_000, 1).await.unwrap();
        assert!(!storage.try_acquire("a", 10, 60_000, 1).await.unwrap().admitted);
        assert!(storage.try_acquire("b", 10, 60_000, 1).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn test_in_memory_peek_does_not_append() {
        let storage = InMemoryRateLimitStorage::new();

        assert_eq!(
            storage.peek("unknown", 5_000, 1_000).await.unwrap(),
            WindowSnapshot::empty()
        );

        storage.try_acquire("u1", 5_000, 1_000, 3).await.unwrap();
        let peeked = storage.peek("u1", 5_100, 1_000).await.unwrap();
        assert_eq!(peeked.count, 1);
        assert_eq!(storage.peek("u1", 5_100, 1_000).await.unwrap().count, 1);

        assert_eq!(storage.peek("u1", 6_000, 1_000).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_in_memory_cleanup_and_delete() {
        let storage = InMemoryRateLimitStorage::new();

        storage.try_acquire("old", 1_000, 100, 5).await.unwrap();
        storage.try_acquire("fresh", 1_000, 10_000, 5).await.unwrap();
        storage.cleanup(2_000).await;

        assert_eq!(storage.len(), 1);
        assert_eq!(storage.peek("fresh", 2_000, 10_000).await.unwrap().count, 1);

        storage.delete("fresh").await.unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_snapshot_from_script() {
        assert_eq!(
            snapshot_from_script(1, 3, 1_700_000_000_000),
            WindowSnapshot {
                admitted: true,
                count: 3,
                oldest_ms: Some(1_700_000_000_000),
            }
        );
        assert_eq!(snapshot_from_script(0, 0, -1), WindowSnapshot::empty());
    }

    #[test]
    fn test_window_key() {
        assert_eq!(window_key("ratelimit", "plaid:7"), "ratelimit:plaid:7");
    }
}
