//! Persistent cache tier and cache construction from configuration.

pub mod file_store;

use std::path::Path;

use taskweave_core::cache::Cache;
use taskweave_types::config::CacheConfig;

use crate::config::resolve_cache_dir;

pub use file_store::FileCacheStore;

/// Build the engine cache described by `config`.
///
/// With `persistent = true` the cache is backed by a [`FileCacheStore`] in the
/// resolved cache directory; otherwise it is memory-only.
pub fn open_cache(config: &CacheConfig, data_dir: &Path) -> Cache {
    if config.persistent {
        let dir = resolve_cache_dir(config, data_dir);
        tracing::debug!(dir = %dir.display(), "opening persistent cache tier");
        Cache::with_store(config, FileCacheStore::new(dir))
    } else {
        Cache::new(config)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use taskweave_core::cache::store::PersistentStore;
    use tempfile::TempDir;

    use super::*;

    fn config(max_entries: usize) -> CacheConfig {
        CacheConfig {
            max_entries,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_entries_survive_a_new_cache_instance() {
        let tmp = TempDir::new().unwrap();
        let first = open_cache(&config(10), tmp.path());
        first
            .set("report", json!({"pages": 12}), None, ["seo"])
            .await;
        drop(first);

        let second = open_cache(&config(10), tmp.path());
        assert_eq!(second.get("report").await, Some(json!({"pages": 12})));
        assert_eq!(second.stats().persistent_hits, 1);
        // Promotion restores the tag index.
        assert_eq!(second.keys_for_tag("seo"), vec!["report".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_by_tags_reaches_files_written_by_other_instances() {
        let tmp = TempDir::new().unwrap();
        open_cache(&config(10), tmp.path())
            .set("a", json!(1), None, ["seo"])
            .await;

        let cache = open_cache(&config(10), tmp.path());
        cache.set("b", json!(2), None, ["other"]).await;

        assert_eq!(cache.clear_by_tags(&["seo"]).await, 1);
        let store = FileCacheStore::new(tmp.path().join("cache"));
        assert!(store.load("a").await.unwrap().is_none());
        assert!(store.load("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_file_is_removed_on_read() {
        let tmp = TempDir::new().unwrap();
        let cache = open_cache(&config(10), tmp.path());
        cache
            .set("short", json!(1), Some(Duration::ZERO), Vec::<String>::new())
            .await;

        let fresh = open_cache(&config(10), tmp.path());
        assert_eq!(fresh.get("short").await, None);
        let usage = fresh.persistent_usage().await.unwrap();
        assert_eq!(usage.entries, 0);
    }

    #[tokio::test]
    async fn test_memory_only_when_not_persistent() {
        let tmp = TempDir::new().unwrap();
        let cfg = CacheConfig {
            persistent: false,
            ..config(10)
        };
        let cache = open_cache(&cfg, tmp.path());
        cache.set("k", json!(1), None, Vec::<String>::new()).await;

        assert!(!cache.has_persistent_tier());
        assert!(!tmp.path().join("cache").exists());
    }
}
