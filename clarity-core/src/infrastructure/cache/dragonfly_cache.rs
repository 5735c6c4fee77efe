//! Dragonfly database cache tier
//!
//! This module provides the Redis-compatible persistent tier backed by the
//! Dragonfly database. Dragonfly is a high-performance, multi-threaded
//! in-memory data store that speaks the Redis protocol.
// cspell:ignore Dragonfly GzEncoder GzDecoder flate

use async_trait::async_trait;
use redis::Client;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use super::persistent::PersistentCacheStore;
use crate::application::errors::StorageError;

const COMPRESSION_MARKER: &[u8; 4] = b"GZIP";

/// Write the value and add it to each tag set. Tag sets live one minute past
/// their longest-lived member; stale members are filtered on invalidation.
const SET_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
local tag_ttl = tonumber(ARGV[2]) + 60000
for i = 2, #KEYS do
  redis.call('SADD', KEYS[i], ARGV[3])
  if redis.call('PTTL', KEYS[i]) < tag_ttl then
    redis.call('PEXPIRE', KEYS[i], tag_ttl)
  end
end
return redis.status_reply('OK')
"#;

/// Dragonfly persistent cache store
pub struct DragonflyCacheStore {
    connection_manager: Arc<ConnectionManager>,
    key_prefix: String,
    enable_compression: bool,
    compression_threshold_bytes: u64,
    set_script: redis::Script,
}

impl DragonflyCacheStore {
    /// Create a new Dragonfly cache store
    ///
    /// # Arguments
    /// * `url` - Connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `key_prefix` - Namespace for value keys and tag sets
    /// * `enable_compression` - Whether to enable compression for large entries
    /// * `compression_threshold_bytes` - Minimum size in bytes to trigger compression
    ///
    /// # Errors
    /// Returns an error if the connection to the Dragonfly database cannot be established
    pub async fn new(
        url: &str,
        key_prefix: &str,
        enable_compression: bool,
        compression_threshold_bytes: u64,
    ) -> Result<Self, StorageError> {
        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            StorageError::Unavailable(format!("Failed to connect to the Dragonfly database: {}", e))
        })?;

        let connection_manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to create connection manager: {}", e);
            StorageError::Unavailable(format!(
                "Failed to establish connection to the Dragonfly database: {}",
                e
            ))
        })?;

        // Test the connection
        let mut conn = connection_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| {
                error!("Failed to ping the Dragonfly database: {}", e);
                StorageError::Unavailable(format!("Failed to ping the Dragonfly database: {}", e))
            })?;

        debug!(
            "Successfully connected to the Dragonfly database at {}",
            url
        );

        Ok(Self {
            connection_manager: Arc::new(connection_manager),
            key_prefix: key_prefix.to_string(),
            enable_compression,
            compression_threshold_bytes,
            set_script: redis::Script::new(SET_SCRIPT),
        })
    }

    fn value_key(&self, key: &str) -> String {
        value_key(&self.key_prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        tag_key(&self.key_prefix, tag)
    }

    fn encode(&self, value: Vec<u8>) -> Result<Vec<u8>, StorageError> {
        if self.enable_compression && value.len() as u64 > self.compression_threshold_bytes {
            let compressed = compress_data(&value)?;
            let mut result = COMPRESSION_MARKER.to_vec();
            result.extend_from_slice(&compressed);
            Ok(result)
        } else {
            Ok(value)
        }
    }
}

/// Redis key for a cached value
pub fn value_key(prefix: &str, key: &str) -> String {
    format!("{}:v:{}", prefix, key)
}

/// Redis key for a tag's member set
pub fn tag_key(prefix: &str, tag: &str) -> String {
    format!("{}:tag:{}", prefix, tag)
}

/// Compress data using gzip
fn compress_data(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| StorageError::Serialization(format!("Compression error: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| StorageError::Serialization(format!("Compression finish error: {}", e)))
}

/// Decompress a stored value when it carries the compression marker
fn decode(value: Vec<u8>) -> Result<Vec<u8>, StorageError> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    if value.len() > COMPRESSION_MARKER.len()
        && &value[0..COMPRESSION_MARKER.len()] == COMPRESSION_MARKER.as_slice()
    {
        let mut decoder = GzDecoder::new(&value[COMPRESSION_MARKER.len()..]);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| StorageError::Serialization(format!("Decompression error: {}", e)))?;
        Ok(decompressed)
    } else {
        Ok(value)
    }
}

#[async_trait]
impl PersistentCacheStore for DragonflyCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut conn = (*self.connection_manager).clone();

        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.value_key(key))
            .query_async::<Option<Vec<u8>>>(&mut conn)
            .await?;

        match value {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => {
                debug!("Persistent cache miss for key: {}", key);
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        tags: &[String],
    ) -> Result<(), StorageError> {
        let mut conn = (*self.connection_manager).clone();
        let value_key = self.value_key(key);
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let final_data = self.encode(value)?;

        let mut invocation = self.set_script.key(&value_key);
        for tag in tags {
            invocation.key(self.tag_key(tag));
        }
        let _: () = invocation
            .arg(final_data)
            .arg(ttl_ms)
            .arg(key)
            .invoke_async(&mut conn)
            .await?;

        debug!(
            "Successfully cached entry for key: {} with TTL: {}ms",
            key, ttl_ms
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = (*self.connection_manager).clone();

        redis::cmd("DEL")
            .arg(self.value_key(key))
            .query_async::<i64>(&mut conn)
            .await?;

        Ok(())
    }

    async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = (*self.connection_manager).clone();

        let keys: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.tag_key(tag))
            .query_async(&mut conn)
            .await?;

        Ok(keys)
    }

    async fn delete_tag(&self, tag: &str) -> Result<(), StorageError> {
        let mut conn = (*self.connection_manager).clone();

        redis::cmd("DEL")
            .arg(self.tag_key(tag))
            .query_async::<i64>(&mut conn)
            .await?;

        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut conn = (*self.connection_manager).clone();
        let pattern = format!("{}:*", self.key_prefix);
        let mut cursor: u64 = 0;

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

        Ok(())
    }

    fn name(&self) -> &'static str {
        "dragonfly"
    }
}
