//! Two-tier cache with TTL expiry and tag-based bulk invalidation.
//!
//! The `Cache` facade combines:
//! - `memory` -- bounded in-process tier with per-entry TTL and LRU eviction
//! - `store` -- optional persistent tier port (implemented in taskweave-infra)
//! - `tags` -- tag index used by `clear_by_tags`
//!
//! Reads check memory first, then the persistent tier, promoting valid
//! persistent hits back into memory. Persistent-tier failures are logged and
//! swallowed; the in-process tier stays authoritative.
//!
//! `get_or_set` is cache-aside. Concurrent misses for the same key each run
//! their own factory unless single-flight is enabled in [`CacheConfig`].

pub mod memory;
pub mod store;
pub mod tags;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use taskweave_types::cache::{CacheEntry, CacheStats, PruneReport, StoreUsage};
use taskweave_types::config::CacheConfig;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::batch::{self, DEFAULT_CHUNK_SIZE};
use crate::clock::{Clock, SystemClock};

use self::memory::{InsertOutcome, Lookup, MemoryTier};
use self::store::{BoxPersistentStore, PersistentStore};
use self::tags::TagIndex;

/// Per-write options for [`Cache::set_with`] and [`Cache::get_or_set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Falls back to the cache's default TTL when unset.
    pub ttl: Option<Duration>,
    pub tags: BTreeSet<String>,
    /// Write only to the in-process tier.
    pub skip_persistent: bool,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn skip_persistent(mut self) -> Self {
        self.skip_persistent = true;
        self
    }
}

#[derive(Debug)]
struct CacheState {
    memory: MemoryTier,
    tags: TagIndex,
    stats: CacheStats,
}

/// Process-shareable two-tier cache. Wrap in `Arc` to share between callers.
pub struct Cache {
    state: Mutex<CacheState>,
    store: Option<BoxPersistentStore>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    persistent_max_bytes: u64,
    single_flight: bool,
    in_flight: DashMap<String, Arc<OnceCell<Value>>>,
}

impl Cache {
    /// Create a memory-only cache.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                memory: MemoryTier::new(config.max_entries),
                tags: TagIndex::new(),
                stats: CacheStats::default(),
            }),
            store: None,
            clock: Arc::new(SystemClock),
            default_ttl: config.default_ttl(),
            persistent_max_bytes: config.persistent_max_bytes,
            single_flight: config.single_flight,
            in_flight: DashMap::new(),
        }
    }

    /// Create a cache backed by a persistent tier.
    pub fn with_store<S: PersistentStore + 'static>(config: &CacheConfig, store: S) -> Self {
        let mut cache = Self::new(config);
        cache.store = Some(BoxPersistentStore::new(store));
        cache
    }

    /// Replace the clock used for TTL checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn has_persistent_tier(&self) -> bool {
        self.store.is_some()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up `key`: memory first, then the persistent tier (promoting hits).
    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        {
            let mut state = self.state();
            match state.memory.get(key, now) {
                Lookup::Hit(value) => {
                    state.stats.hits += 1;
                    return Some(value);
                }
                Lookup::Expired(_) => {
                    state.stats.expirations += 1;
                    state.tags.remove(key);
                }
                Lookup::Miss => {}
            }
        }

        if let Some(store) = &self.store {
            match store.load(key).await {
                Ok(Some(mut entry)) if entry.is_valid_at(now) => {
                    entry.hit_count += 1;
                    let value = entry.data.clone();
                    let mut state = self.state();
                    self.admit(&mut state, entry, now);
                    state.stats.hits += 1;
                    state.stats.persistent_hits += 1;
                    tracing::debug!(key, "promoted persistent cache entry");
                    return Some(value);
                }
                Ok(Some(_)) => {
                    if let Err(e) = store.remove(key).await {
                        tracing::warn!(key, error = %e, "failed to remove expired persistent cache entry");
                    }
                    self.forget_if_absent(key);
                }
                Ok(None) => self.forget_if_absent(key),
                Err(e) => {
                    tracing::warn!(key, error = %e, "persistent cache read failed");
                }
            }
        }

        self.state().stats.misses += 1;
        None
    }

    /// True if a valid entry exists in either tier. Does not count as a lookup.
    pub async fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        if self.state().memory.contains_valid(key, now) {
            return true;
        }
        match &self.store {
            Some(store) => matches!(store.load(key).await, Ok(Some(entry)) if entry.is_valid_at(now)),
            None => false,
        }
    }

    /// Store `value` under `key` with an optional TTL and tags.
    pub async fn set<I, S>(&self, key: &str, value: Value, ttl: Option<Duration>, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = SetOptions {
            ttl,
            ..SetOptions::default()
        }
        .tags(tags);
        self.set_with(key, value, options).await;
    }

    /// Store `value` under `key`.
    ///
    /// Always writes the in-process tier; writes the persistent tier unless
    /// `options.skip_persistent` is set.
    pub async fn set_with(&self, key: &str, value: Value, options: SetOptions) {
        let now = self.clock.now();
        let ttl = options.ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry::new(key, value, ttl, options.tags, now);

        let persist = match &self.store {
            Some(store) if !options.skip_persistent => Some((store, entry.clone())),
            _ => None,
        };

        {
            let mut state = self.state();
            self.admit(&mut state, entry, now);
            state.stats.writes += 1;
        }

        if let Some((store, entry)) = persist {
            if let Err(e) = store.save(&entry).await {
                tracing::warn!(key, error = %e, "persistent cache write failed");
            }
        }
    }

    /// Remove `key` from both tiers and from the tag index.
    pub async fn delete(&self, key: &str) {
        {
            let mut state = self.state();
            state.memory.remove(key);
            state.tags.remove(key);
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(key).await {
                tracing::warn!(key, error = %e, "persistent cache delete failed");
            }
        }
    }

    /// Delete every entry carrying at least one of `tags`. Returns the number
    /// of keys invalidated.
    pub async fn clear_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let tags: Vec<String> = tags.iter().map(|t| t.as_ref().to_string()).collect();
        let mut keys = self.state().tags.keys_for_tags(&tags);

        if let Some(store) = &self.store {
            match store.find_by_tags(&tags).await {
                Ok(found) => keys.extend(found),
                Err(e) => {
                    tracing::warn!(error = %e, "persistent cache tag scan failed");
                }
            }
        }

        let keys: Vec<String> = keys.into_iter().collect();
        let count = keys.len();
        batch::map_bounded(keys, DEFAULT_CHUNK_SIZE, |key| async move {
            self.delete(&key).await;
        })
        .await;

        tracing::debug!(tags = ?tags, count, "cleared cache entries by tag");
        count
    }

    /// Cache-aside: return the cached value, or run `factory` once, store its
    /// result, and return it. Factory errors are returned and nothing is cached.
    pub async fn get_or_set<F, Fut, E>(&self, key: &str, options: SetOptions, factory: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if self.single_flight {
            return self.get_or_set_shared(key, options, factory).await;
        }

        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = factory().await?;
        self.set_with(key, value.clone(), options).await;
        Ok(value)
    }

    /// Single-flight variant: concurrent misses for `key` share one factory run.
    async fn get_or_set_shared<F, Fut, E>(&self, key: &str, options: SetOptions, factory: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let cell = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async move {
                let value = factory().await?;
                self.set_with(key, value.clone(), options).await;
                Ok(value)
            })
            .await
            .cloned();

        self.in_flight.remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
        result
    }

    /// Look up many keys; returns only the hits.
    pub async fn get_many(&self, keys: Vec<String>) -> HashMap<String, Value> {
        batch::map_bounded(keys, DEFAULT_CHUNK_SIZE, |key| async move {
            let value = self.get(&key).await;
            (key, value)
        })
        .await
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect()
    }

    /// Store many key/value pairs with shared options.
    pub async fn set_many(&self, entries: Vec<(String, Value)>, options: SetOptions) {
        batch::process_in_chunks(entries, DEFAULT_CHUNK_SIZE, |(key, value)| {
            let options = options.clone();
            async move { self.set_with(&key, value, options).await }
        })
        .await;
    }

    /// Keys currently indexed under `tag`.
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.state().tags.keys_for_tags(&[tag]).into_iter().collect()
    }

    /// Remove expired entries from the in-process tier. Returns the count.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state();
        let expired = state.memory.purge_expired(now);
        for entry in &expired {
            state.tags.remove(&entry.key);
        }
        state.stats.expirations += expired.len() as u64;
        expired.len()
    }

    /// Empty both tiers and the tag index. Counters are kept.
    pub async fn clear(&self) {
        {
            let mut state = self.state();
            state.memory.clear();
            state.tags.clear();
        }
        if let Some(store) = &self.store {
            match store.clear().await {
                Ok(removed) => tracing::debug!(removed, "cleared persistent cache"),
                Err(e) => tracing::warn!(error = %e, "persistent cache clear failed"),
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            memory_entries: state.memory.len(),
            tag_count: state.tags.tag_count(),
            ..state.stats.clone()
        }
    }

    /// Disk usage of the persistent tier, if there is one and it is readable.
    pub async fn persistent_usage(&self) -> Option<StoreUsage> {
        let store = self.store.as_ref()?;
        match store.usage().await {
            Ok(usage) => Some(usage),
            Err(e) => {
                tracing::warn!(error = %e, "persistent cache usage scan failed");
                None
            }
        }
    }

    /// Run persistent-tier housekeeping against the configured byte budget,
    /// then drop tag memberships of keys neither tier holds any more.
    pub async fn prune_persistent(&self) -> Option<PruneReport> {
        let store = self.store.as_ref()?;
        match store.prune(self.persistent_max_bytes).await {
            Ok(report) => {
                if report.removed_entries > 0 {
                    tracing::info!(
                        removed = report.removed_entries,
                        bytes_before = report.bytes_before,
                        bytes_after = report.bytes_after,
                        "pruned persistent cache"
                    );
                }
                self.reconcile_tags(store).await;
                Some(report)
            }
            Err(e) => {
                tracing::warn!(error = %e, "persistent cache prune failed");
                None
            }
        }
    }

    /// Periodically purge expired entries and prune the persistent tier until
    /// `token` is cancelled.
    pub fn spawn_housekeeping(self: &Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = cache.cleanup_expired();
                        cache.prune_persistent().await;
                        tracing::trace!(purged, "cache housekeeping tick");
                    }
                }
            }
            tracing::debug!("cache housekeeping stopped");
        })
    }

    /// Insert into memory and keep the tag index in step with what either
    /// tier still holds.
    fn admit(&self, state: &mut CacheState, entry: CacheEntry, now: chrono::DateTime<chrono::Utc>) {
        let key = entry.key.clone();
        let tags = entry.tags.clone();
        let InsertOutcome {
            expired,
            evicted,
            stored,
        } = state.memory.insert(entry, now);

        for gone in &expired {
            state.tags.remove(&gone.key);
        }
        state.stats.expirations += expired.len() as u64;
        state.stats.evictions += evicted.len() as u64;

        // Evicted entries survive on disk when there is a persistent tier.
        if self.store.is_none() {
            for gone in &evicted {
                state.tags.remove(&gone.key);
            }
        }

        if stored || self.store.is_some() {
            state.tags.insert(&key, &tags);
        }
    }

    /// Drop `key` from the tag index unless memory still holds it.
    fn forget_if_absent(&self, key: &str) {
        let mut state = self.state();
        if state.memory.peek(key).is_none() {
            state.tags.remove(key);
        }
    }

    /// Remove index entries for keys that are in neither tier, such as files
    /// pruned or deleted by another process.
    async fn reconcile_tags(&self, store: &BoxPersistentStore) -> usize {
        let stored: HashSet<String> = match store.keys().await {
            Ok(keys) => keys.into_iter().collect(),
            Err(e) => {
                tracing::warn!(error = %e, "persistent cache key scan failed");
                return 0;
            }
        };

        let mut state = self.state();
        let stale: Vec<String> = state
            .tags
            .keys()
            .filter(|key| !stored.contains(*key) && state.memory.peek(key).is_none())
            .map(str::to_string)
            .collect();
        for key in &stale {
            state.tags.remove(key);
        }
        if !stale.is_empty() {
            tracing::debug!(dropped = stale.len(), "dropped stale tag index entries");
        }
        stale.len()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("persistent", &self.store.is_some())
            .field("default_ttl", &self.default_ttl)
            .field("single_flight", &self.single_flight)
            .finish_non_exhaustive()
    }
}
