//! Cache entry, write options and statistics

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::config::{CacheTier, ValidationError};

/// One cached value with its expiry and tags.
///
/// The same record is stored in both tiers, so a persistent hit carries
/// enough to be promoted with its remaining TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub tier: CacheTier,
    /// Unix timestamp (ms) after which the entry is never served
    pub expires_at: u64,
    pub tags: BTreeSet<String>,
    /// Approximate in-memory footprint
    pub size_bytes: u64,
}

impl CacheEntry {
    pub fn new(key: &str, value: serde_json::Value, options: &CacheSetOptions, now_ms: u64) -> Self {
        let size_bytes = (key.len() + value.to_string().len()) as u64
            + options.tags.iter().map(|tag| tag.len() as u64).sum::<u64>();

        Self {
            key: key.to_string(),
            value,
            tier: options.tier,
            expires_at: now_ms.saturating_add(options.ttl.as_millis() as u64),
            tags: options.tags.clone(),
            size_bytes,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    pub fn remaining_ttl(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now_ms))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Validated options for a cache write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSetOptions {
    ttl: Duration,
    tier: CacheTier,
    tags: BTreeSet<String>,
}

impl CacheSetOptions {
    pub fn new<I, S>(ttl: Duration, tier: CacheTier, tags: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if ttl.is_zero() {
            return Err(ValidationError::cache("ttl must be greater than 0"));
        }

        let tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        if tags.iter().any(|tag| tag.trim().is_empty()) {
            return Err(ValidationError::cache("tags cannot be empty strings"));
        }

        Ok(Self { ttl, tier, tags })
    }

    /// Untagged write
    pub fn untagged(ttl: Duration, tier: CacheTier) -> Result<Self, ValidationError> {
        Self::new(ttl, tier, std::iter::empty::<String>())
    }

    /// Untagged options for loader-populated writes. `ttl` comes from a
    /// validated [`CacheConfig`](crate::config::CacheConfig), so it is non-zero.
    pub(crate) fn loader_default(ttl: Duration, tier: CacheTier) -> Self {
        Self {
            ttl,
            tier,
            tags: BTreeSet::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn tier(&self) -> CacheTier {
        self.tier
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }
}

/// Cumulative cache counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 before the first lookup
    pub hit_rate: f64,
    pub memory_usage_bytes: u64,
    /// Live keys in the memory tier
    pub total_keys: u64,
}

impl CacheStats {
    pub fn new(hits: u64, misses: u64, memory_usage_bytes: u64, total_keys: u64) -> Self {
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        Self {
            hits,
            misses,
            hit_rate,
            memory_usage_bytes,
            total_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_options_reject_zero_ttl() {
        assert!(CacheSetOptions::untagged(Duration::ZERO, CacheTier::Memory).is_err());
        assert!(CacheSetOptions::new(Duration::from_secs(1), CacheTier::Memory, ["", "x"]).is_err());

        let options =
            CacheSetOptions::new(Duration::from_secs(1), CacheTier::Persistent, ["prices", "prices"])
                .unwrap();
        assert_eq!(options.tags().len(), 1);
        assert_eq!(options.tier(), CacheTier::Persistent);
    }

    #[test]
    fn test_entry_expiry() {
        let options = CacheSetOptions::untagged(Duration::from_millis(100), CacheTier::Memory).unwrap();
        let entry = CacheEntry::new("k", serde_json::json!({"a": 1}), &options, 1_000);

        assert_eq!(entry.expires_at, 1_100);
        assert!(!entry.is_expired(1_099));
        assert!(entry.is_expired(1_100));
        assert_eq!(entry.remaining_ttl(1_040), Duration::from_millis(60));
        assert_eq!(entry.remaining_ttl(5_000), Duration::ZERO);
        assert!(entry.size_bytes > 0);
    }

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::new(0, 0, 0, 0).hit_rate, 0.0);
        assert_eq!(CacheStats::new(3, 1, 0, 0).hit_rate, 0.75);
    }
}
