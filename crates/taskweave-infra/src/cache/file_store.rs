//! File-backed persistent cache tier.
//!
//! Implements the `PersistentStore` trait from `taskweave-core`. Each entry is
//! one JSON document holding the serialized `CacheEntry`:
//!
//! ```text
//! {dir}/
//!   3a7bd3e2360a3d29eea436fcfb7e44c735d117c42d1c1835420b6b9942dd4f1b.json
//!   e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855.json
//! ```
//!
//! File names are the SHA-256 of the original key; the key itself is stored
//! inside the document and checked on load. Writes go to a temporary file that
//! is renamed into place, so readers never see a partial document.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use taskweave_core::batch::{self, DEFAULT_CHUNK_SIZE};
use taskweave_core::cache::store::{CacheKeyHasher, PersistentStore};
use taskweave_types::cache::{CacheEntry, PruneReport, StoreUsage};
use taskweave_types::error::CacheError;

use crate::crypto::hash::Sha256KeyHasher;

const ENTRY_EXTENSION: &str = "json";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// An entry file as seen by a directory scan.
#[derive(Debug, Clone)]
struct EntryFile {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

/// Persistent cache tier storing one JSON file per key.
#[derive(Debug, Clone)]
pub struct FileCacheStore<H = Sha256KeyHasher> {
    dir: PathBuf,
    hasher: H,
}

impl FileCacheStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_hasher(dir, Sha256KeyHasher)
    }
}

impl<H: CacheKeyHasher> FileCacheStore<H> {
    pub fn with_hasher(dir: impl Into<PathBuf>, hasher: H) -> Self {
        Self {
            dir: dir.into(),
            hasher,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{dir}/{hash(key)}.json`
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{ENTRY_EXTENSION}", self.hasher.hash_key(key)))
    }

    /// Every readable entry on disk, expired or not. Unreadable files are skipped.
    pub async fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let files = self.scan().await?;
        let loaded = batch::map_bounded(files, DEFAULT_CHUNK_SIZE, |file| async move {
            match read_entry(&file.path).await {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(path = %file.path.display(), error = %e, "skipping unreadable cache file");
                    None
                }
            }
        })
        .await;
        Ok(loaded.into_iter().flatten().collect())
    }

    /// List entry files. A missing directory is an empty store.
    async fn scan(&self) -> Result<Vec<EntryFile>, CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let meta = match item.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                // Removed between listing and stat.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            files.push(EntryFile {
                path,
                len: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(files)
    }
}

async fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_present(path: &Path) -> Result<bool, CacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Delete `files` concurrently; returns how many were actually removed.
async fn remove_all(files: Vec<PathBuf>) -> usize {
    batch::map_bounded(files, DEFAULT_CHUNK_SIZE, |path| async move {
        match remove_if_present(&path).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove cache file");
                false
            }
        }
    })
    .await
    .into_iter()
    .filter(|removed| *removed)
    .count()
}

impl<H: CacheKeyHasher> PersistentStore for FileCacheStore<H> {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let Some(entry) = read_entry(&self.entry_path(key)).await? else {
            return Ok(None);
        };
        if entry.key != key {
            tracing::debug!(key, stored_key = %entry.key, "cache file belongs to another key");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn save(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.entry_path(&entry.key);
        let tmp = path.with_extension(format!(
            "{ENTRY_EXTENSION}.{}-{}.tmp",
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let bytes = serde_json::to_vec(entry)?;

        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        remove_if_present(&self.entry_path(key)).await.map(|_| ())
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let files = self.scan().await?;
        Ok(remove_all(files.into_iter().map(|f| f.path).collect()).await)
    }

    async fn find_by_tags(&self, tags: &[String]) -> Result<Vec<String>, CacheError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|entry| tags.iter().any(|tag| entry.tags.contains(tag)))
            .map(|entry| entry.key)
            .collect())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.entries().await?.into_iter().map(|entry| entry.key).collect())
    }

    async fn usage(&self) -> Result<StoreUsage, CacheError> {
        let files = self.scan().await?;
        Ok(StoreUsage {
            entries: files.len(),
            total_bytes: files.iter().map(|f| f.len).sum(),
        })
    }

    async fn prune(&self, max_bytes: u64) -> Result<PruneReport, CacheError> {
        let mut files = self.scan().await?;
        let bytes_before: u64 = files.iter().map(|f| f.len).sum();
        if bytes_before <= max_bytes {
            return Ok(PruneReport {
                bytes_before,
                bytes_after: bytes_before,
                removed_entries: 0,
            });
        }

        let target = max_bytes / 5 * 4 + max_bytes % 5 * 4 / 5;
        files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

        let mut remaining = bytes_before;
        let mut victims = Vec::new();
        for file in files {
            if remaining <= target {
                break;
            }
            remaining -= file.len;
            victims.push(file.path);
        }

        let removed_entries = remove_all(victims).await;
        let bytes_after = self.usage().await?.total_bytes;
        tracing::debug!(
            dir = %self.dir.display(),
            bytes_before,
            bytes_after,
            removed_entries,
            "pruned cache directory"
        );

        Ok(PruneReport {
            bytes_before,
            bytes_after,
            removed_entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn entry(key: &str, tags: &[&str]) -> CacheEntry {
        CacheEntry::new(
            key,
            json!({ "key": key }),
            Duration::from_secs(60),
            tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            Utc::now(),
        )
    }

    fn set_mtime(path: &Path, secs_after_epoch: u64) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs_after_epoch))
            .unwrap();
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FileCacheStore::new(tmp.path().join("cache"));
        let original = entry("audit:example.com", &["seo"]);

        store.save(&original).await.unwrap();
        let loaded = store.load("audit:example.com").await.unwrap();

        assert_eq!(loaded, Some(original));
    }

    #[tokio::test]
    async fn test_file_name_is_sha256_of_key() {
        let tmp = TempDir::new().unwrap();
        let store = FileCacheStore::new(tmp.path());
        store.save(&entry("", &[])).await.unwrap();

        let expected = tmp
            .path()
            .join("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855.json");
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn test_missing_dir_and_key_are_empty() {
        let tmp = TempDir::new().unwrap();
        let store = FileCacheStore::new(tmp.path().join("never-created"));

        assert_eq!(store.load("nope").await.unwrap(), None);
        assert_eq!(store.usage().await.unwrap(), StoreUsage::default());
        assert_eq!(store.clear().await.unwrap(), 0);
        store.remove("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_load_rejects_foreign_key() {
        let tmp = TempDir::new().unwrap();
        let store = FileCacheStore::new(tmp.path());
        let bytes = serde_json::to_vec(&entry("a", &[])).unwrap();
        std::fs::write(store.entry_path("b"), bytes).unwrap();

        assert_eq!(store.load("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error_on_load() {
        let tmp = TempDir::new().unwrap();
        let store = FileCacheStore::new(tmp.path());
        std::fs::write(store.entry_path("k"), b"{ not json").unwrap();

        assert!(matches!(
            store.load("k").await,
            Err(CacheError::Serialization(_))
        ));
        // Scans skip it.
        assert!(store.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keys_find_by_tags_and_clear() {
        let tmp = TempDir::new().unwrap();
        let store = FileCacheStore::new(tmp.path());
        store.save(&entry("a", &["seo"])).await.unwrap();
        store.save(&entry("b", &["perf"])).await.unwrap();
        store.save(&entry("c", &["seo", "perf"])).await.unwrap();

        let mut found = store.find_by_tags(&["seo".to_string()]).await.unwrap();
        found.sort();
        assert_eq!(found, vec!["a", "c"]);

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);

        assert_eq!(store.clear().await.unwrap(), 3);
        assert_eq!(store.usage().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_save_overwrites_and_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = FileCacheStore::new(tmp.path());
        store.save(&entry("k", &["old"])).await.unwrap();
        store.save(&entry("k", &["new"])).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        let loaded = store.load("k").await.unwrap().unwrap();
        assert!(loaded.tags.contains("new"));
    }

    #[tokio::test]
    async fn test_prune_removes_oldest_until_eighty_percent() {
        let tmp = TempDir::new().unwrap();
        let store = FileCacheStore::new(tmp.path());

        for (i, key) in ["oldest", "older", "newer", "newest"].iter().enumerate() {
            let e = entry(key, &[]);
            store.save(&e).await.unwrap();
            set_mtime(&store.entry_path(key), 1_000 + i as u64);
        }
        let usage = store.usage().await.unwrap();

        // One byte over budget: dropping the oldest file gets under 80%.
        let budget = usage.total_bytes - 1;
        let report = store.prune(budget).await.unwrap();

        assert_eq!(report.bytes_before, usage.total_bytes);
        assert_eq!(report.removed_entries, 1);
        assert!(report.bytes_after <= budget * 4 / 5);
        assert!(store.load("oldest").await.unwrap().is_none());
        assert!(store.load("older").await.unwrap().is_some());
        assert!(store.load("newest").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_prune_under_budget_is_noop() {
        let tmp = TempDir::new().unwrap();
        let store = FileCacheStore::new(tmp.path());
        store.save(&entry("a", &[])).await.unwrap();

        let report = store.prune(u64::MAX).await.unwrap();
        assert_eq!(report.removed_entries, 0);
        assert_eq!(report.bytes_before, report.bytes_after);
    }
}
