//! Application state shared by the CLI commands.
//!
//! Resolves the data directory, loads `config.toml` and opens the engine
//! cache pinned to the concrete infra store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use taskweave_core::cache::Cache;
use taskweave_infra::cache::{FileCacheStore, open_cache};
use taskweave_infra::config::{load_engine_config, resolve_cache_dir};
use taskweave_infra::filesystem::resolve_data_dir;
use taskweave_types::config::EngineConfig;

pub struct AppState {
    pub config: EngineConfig,
    pub data_dir: PathBuf,
    /// Directory of the persistent cache tier (may not exist yet).
    pub cache_dir: PathBuf,
    pub cache: Arc<Cache>,
}

impl AppState {
    /// Resolve the data directory, load configuration and open the cache.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;
        let cache_dir = resolve_cache_dir(&config.cache, &data_dir);
        let cache = Arc::new(open_cache(&config.cache, &data_dir));

        tracing::debug!(
            data_dir = %data_dir.display(),
            cache_dir = %cache_dir.display(),
            persistent = config.cache.persistent,
            "application state ready"
        );

        Ok(Self {
            config,
            data_dir,
            cache_dir,
            cache,
        })
    }

    /// Direct handle on the on-disk tier, for listing raw entries.
    pub fn file_store(&self) -> FileCacheStore {
        FileCacheStore::new(self.cache_dir.clone())
    }
}
