//! Cache entry and statistics types shared by both cache tiers.
//!
//! A `CacheEntry` is what the in-process tier holds and what the persistent
//! tier serializes to disk (one JSON document per key).

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached value with its expiry metadata and invalidation tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The original (unhashed) cache key.
    pub key: String,
    pub data: Value,
    pub stored_at: DateTime<Utc>,
    #[serde(with = "crate::serde_millis")]
    pub ttl: Duration,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub hit_count: u64,
    /// Serialized size of `data` in bytes.
    #[serde(default)]
    pub approximate_size: u64,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        data: Value,
        ttl: Duration,
        tags: BTreeSet<String>,
        stored_at: DateTime<Utc>,
    ) -> Self {
        let approximate_size = serde_json::to_vec(&data)
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(0);
        Self {
            key: key.into(),
            data,
            stored_at,
            ttl,
            tags,
            hit_count: 0,
            approximate_size,
        }
    }

    /// An entry is valid iff `now - stored_at < ttl` (strict).
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.stored_at) < ttl
    }

    /// Instant at which the entry stops being valid.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        self.stored_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Counters describing cache behavior since construction (or the last reset).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Hits served by the persistent tier and promoted into memory.
    pub persistent_hits: u64,
    pub writes: u64,
    /// Valid entries dropped to make room (LRU).
    pub evictions: u64,
    /// Expired entries removed from the in-process tier.
    pub expirations: u64,
    pub memory_entries: usize,
    pub tag_count: usize,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or 0 when there were no lookups.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Disk usage report for the persistent tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreUsage {
    pub entries: usize,
    pub total_bytes: u64,
}

/// Outcome of a persistent-tier pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub removed_entries: usize,
}
