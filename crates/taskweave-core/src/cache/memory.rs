//! In-process cache tier: a bounded map with per-entry TTL and LRU eviction.
//!
//! Not thread-safe on its own; the cache facade guards it with a mutex and
//! never holds that mutex across an await point.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::Value;
use taskweave_types::cache::CacheEntry;

/// Result of a lookup in the in-process tier.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(Value),
    /// The key was present but had expired; it has been removed.
    Expired(CacheEntry),
    Miss,
}

/// Entries removed as a side effect of an insert.
#[derive(Debug, Default)]
pub struct InsertOutcome {
    /// Expired entries purged to make room.
    pub expired: Vec<CacheEntry>,
    /// Valid entries evicted in least-recently-used order.
    pub evicted: Vec<CacheEntry>,
    /// False when the tier has zero capacity and nothing was stored.
    pub stored: bool,
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    last_access: u64,
}

/// Bounded TTL map with least-recently-used eviction.
#[derive(Debug)]
pub struct MemoryTier {
    capacity: usize,
    slots: HashMap<String, Slot>,
    /// Access tick -> key, oldest first.
    recency: BTreeMap<u64, String>,
    tick: u64,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Look up `key`, bumping its recency and hit count on a valid hit.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Lookup {
        let valid = match self.slots.get(key) {
            None => return Lookup::Miss,
            Some(slot) => slot.entry.is_valid_at(now),
        };

        if !valid {
            return match self.remove(key) {
                Some(entry) => Lookup::Expired(entry),
                None => Lookup::Miss,
            };
        }

        let tick = self.next_tick();
        match self.slots.get_mut(key) {
            Some(slot) => {
                self.recency.remove(&slot.last_access);
                self.recency.insert(tick, key.to_string());
                slot.last_access = tick;
                slot.entry.hit_count += 1;
                Lookup::Hit(slot.entry.data.clone())
            }
            None => Lookup::Miss,
        }
    }

    /// True if `key` holds a valid entry. Does not affect recency.
    pub fn contains_valid(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.entry.is_valid_at(now))
    }

    /// Borrow an entry without touching recency or validity.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.slots.get(key).map(|slot| &slot.entry)
    }

    /// Insert or replace an entry.
    ///
    /// When the tier is full, expired entries are purged first; only if that
    /// frees nothing is the least-recently-used valid entry evicted.
    pub fn insert(&mut self, entry: CacheEntry, now: DateTime<Utc>) -> InsertOutcome {
        let mut outcome = InsertOutcome::default();
        if self.capacity == 0 {
            return outcome;
        }

        // Replacing an existing key never needs room.
        self.remove(&entry.key);

        if self.slots.len() >= self.capacity {
            outcome.expired = self.purge_expired(now);
        }
        while self.slots.len() >= self.capacity {
            match self.evict_lru() {
                Some(evicted) => outcome.evicted.push(evicted),
                None => break,
            }
        }

        let tick = self.next_tick();
        self.recency.insert(tick, entry.key.clone());
        self.slots.insert(
            entry.key.clone(),
            Slot {
                entry,
                last_access: tick,
            },
        );
        outcome.stored = true;
        outcome
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.slots.remove(key)?;
        self.recency.remove(&slot.last_access);
        Some(slot.entry)
    }

    /// Remove every expired entry and return them.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> Vec<CacheEntry> {
        let expired: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| !slot.entry.is_valid_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.remove(&key))
            .collect()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.recency.clear();
    }

    fn evict_lru(&mut self) -> Option<CacheEntry> {
        let (_, key) = self.recency.pop_first()?;
        self.slots.remove(&key).map(|slot| slot.entry)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use chrono::TimeDelta;
    use serde_json::json;

    use super::*;

    fn entry(key: &str, ttl_ms: u64, at: DateTime<Utc>) -> CacheEntry {
        CacheEntry::new(key, json!(key), Duration::from_millis(ttl_ms), BTreeSet::new(), at)
    }

    #[test]
    fn get_hit_increments_hit_count() {
        let now = Utc::now();
        let mut tier = MemoryTier::new(4);
        tier.insert(entry("a", 1_000, now), now);

        assert_eq!(tier.get("a", now), Lookup::Hit(json!("a")));
        assert_eq!(tier.get("a", now), Lookup::Hit(json!("a")));
        assert_eq!(tier.peek("a").unwrap().hit_count, 2);
    }

    #[test]
    fn expired_entry_is_removed_on_read() {
        let now = Utc::now();
        let mut tier = MemoryTier::new(4);
        tier.insert(entry("a", 100, now), now);

        let later = now + TimeDelta::milliseconds(150);
        assert!(matches!(tier.get("a", later), Lookup::Expired(_)));
        assert!(tier.is_empty());
        assert_eq!(tier.get("a", later), Lookup::Miss);
    }

    #[test]
    fn capacity_one_evicts_previous_key() {
        let now = Utc::now();
        let mut tier = MemoryTier::new(1);
        tier.insert(entry("x", 10_000, now), now);
        let outcome = tier.insert(entry("y", 10_000, now), now);

        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].key, "x");
        assert_eq!(tier.get("x", now), Lookup::Miss);
        assert_eq!(tier.get("y", now), Lookup::Hit(json!("y")));
    }

    #[test]
    fn lru_order_follows_reads() {
        let now = Utc::now();
        let mut tier = MemoryTier::new(2);
        tier.insert(entry("a", 10_000, now), now);
        tier.insert(entry("b", 10_000, now), now);

        // Touch "a" so "b" becomes least recently used.
        tier.get("a", now);
        let outcome = tier.insert(entry("c", 10_000, now), now);

        assert_eq!(outcome.evicted[0].key, "b");
        assert!(tier.contains_valid("a", now));
        assert!(tier.contains_valid("c", now));
    }

    #[test]
    fn expired_entries_are_purged_before_valid_ones_are_evicted() {
        let now = Utc::now();
        let mut tier = MemoryTier::new(2);
        // "old" is least recently used but still valid; "short" expires.
        tier.insert(entry("old", 10_000, now), now);
        tier.insert(entry("short", 50, now), now);

        let later = now + TimeDelta::milliseconds(100);
        let outcome = tier.insert(entry("new", 10_000, later), later);

        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.expired.len(), 1);
        assert_eq!(outcome.expired[0].key, "short");
        assert!(tier.contains_valid("old", later));
        assert!(tier.contains_valid("new", later));
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let now = Utc::now();
        let mut tier = MemoryTier::new(1);
        tier.insert(entry("a", 10_000, now), now);
        let outcome = tier.insert(entry("a", 20_000, now), now);

        assert!(outcome.evicted.is_empty());
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.peek("a").unwrap().ttl, Duration::from_millis(20_000));
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let now = Utc::now();
        let mut tier = MemoryTier::new(0);
        let outcome = tier.insert(entry("a", 1_000, now), now);
        assert!(!outcome.stored);
        assert!(tier.is_empty());
    }
}
