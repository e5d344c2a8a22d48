//! Persistent cache tier port.
//!
//! Defines the interface for the on-disk (or otherwise durable) tier that sits
//! behind the in-process cache. Implementations live in taskweave-infra.
//!
//! Follows the same pattern as the other ports in this crate:
//! 1. `PersistentStore` uses RPITIT (native async fn in traits)
//! 2. `PersistentStoreDyn` is the object-safe version with boxed futures
//! 3. `BoxPersistentStore` wraps `Box<dyn PersistentStoreDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use taskweave_types::cache::{CacheEntry, PruneReport, StoreUsage};
use taskweave_types::error::CacheError;

/// Durable storage for cache entries, addressed by the original key.
pub trait PersistentStore: Send + Sync {
    /// Load the entry stored for `key`. Returns None if nothing is stored.
    ///
    /// Expiry is not checked here; the cache decides validity.
    fn load(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<CacheEntry>, CacheError>> + Send;

    /// Store an entry (upsert), keyed by `entry.key`.
    fn save(&self, entry: &CacheEntry) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Remove the entry for `key`. No-op if nothing is stored.
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Remove every entry. Returns the number removed.
    fn clear(&self) -> impl Future<Output = Result<usize, CacheError>> + Send;

    /// Keys of stored entries carrying at least one of `tags`.
    fn find_by_tags(
        &self,
        tags: &[String],
    ) -> impl Future<Output = Result<Vec<String>, CacheError>> + Send;

    /// Keys of every stored entry, expired or not.
    fn keys(&self) -> impl Future<Output = Result<Vec<String>, CacheError>> + Send;

    /// Current entry count and total size on disk.
    fn usage(&self) -> impl Future<Output = Result<StoreUsage, CacheError>> + Send;

    /// If usage exceeds `max_bytes`, delete oldest-modified entries until usage
    /// is at most 80% of `max_bytes`.
    fn prune(&self, max_bytes: u64) -> impl Future<Output = Result<PruneReport, CacheError>> + Send;
}

/// Abstraction over key-to-filename hashing for content-addressed storage.
///
/// The `Sha256KeyHasher` adapter lives in taskweave-infra.
pub trait CacheKeyHasher: Send + Sync {
    /// Compute a filesystem-safe, deterministic digest of `key`.
    fn hash_key(&self, key: &str) -> String;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`PersistentStore`] with boxed futures.
///
/// A blanket implementation is provided for all types implementing `PersistentStore`.
pub trait PersistentStoreDyn: Send + Sync {
    fn load_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CacheEntry>, CacheError>>;

    fn save_boxed<'a>(&'a self, entry: &'a CacheEntry) -> BoxFuture<'a, Result<(), CacheError>>;

    fn remove_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>>;

    fn clear_boxed(&self) -> BoxFuture<'_, Result<usize, CacheError>>;

    fn find_by_tags_boxed<'a>(&'a self, tags: &'a [String]) -> BoxFuture<'a, Result<Vec<String>, CacheError>>;

    fn keys_boxed(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>>;

    fn usage_boxed(&self) -> BoxFuture<'_, Result<StoreUsage, CacheError>>;

    fn prune_boxed(&self, max_bytes: u64) -> BoxFuture<'_, Result<PruneReport, CacheError>>;
}

impl<T: PersistentStore> PersistentStoreDyn for T {
    fn load_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CacheEntry>, CacheError>> {
        Box::pin(self.load(key))
    }

    fn save_boxed<'a>(&'a self, entry: &'a CacheEntry) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(self.save(entry))
    }

    fn remove_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(self.remove(key))
    }

    fn clear_boxed(&self) -> BoxFuture<'_, Result<usize, CacheError>> {
        Box::pin(self.clear())
    }

    fn find_by_tags_boxed<'a>(&'a self, tags: &'a [String]) -> BoxFuture<'a, Result<Vec<String>, CacheError>> {
        Box::pin(self.find_by_tags(tags))
    }

    fn keys_boxed(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        Box::pin(self.keys())
    }

    fn usage_boxed(&self) -> BoxFuture<'_, Result<StoreUsage, CacheError>> {
        Box::pin(self.usage())
    }

    fn prune_boxed(&self, max_bytes: u64) -> BoxFuture<'_, Result<PruneReport, CacheError>> {
        Box::pin(self.prune(max_bytes))
    }
}

/// Type-erased persistent store held by the cache facade.
pub struct BoxPersistentStore {
    inner: Box<dyn PersistentStoreDyn>,
}

impl BoxPersistentStore {
    pub fn new<S: PersistentStore + 'static>(store: S) -> Self {
        Self {
            inner: Box::new(store),
        }
    }

    pub async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.inner.load_boxed(key).await
    }

    pub async fn save(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.inner.save_boxed(entry).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.inner.remove_boxed(key).await
    }

    pub async fn clear(&self) -> Result<usize, CacheError> {
        self.inner.clear_boxed().await
    }

    pub async fn find_by_tags(&self, tags: &[String]) -> Result<Vec<String>, CacheError> {
        self.inner.find_by_tags_boxed(tags).await
    }

    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.keys_boxed().await
    }

    pub async fn usage(&self) -> Result<StoreUsage, CacheError> {
        self.inner.usage_boxed().await
    }

    pub async fn prune(&self, max_bytes: u64) -> Result<PruneReport, CacheError> {
        self.inner.prune_boxed(max_bytes).await
    }
}

impl std::fmt::Debug for BoxPersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxPersistentStore").finish_non_exhaustive()
    }
}
