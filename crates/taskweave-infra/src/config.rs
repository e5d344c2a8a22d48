//! Engine configuration loader for Taskweave.
//!
//! Reads `config.toml` from the data directory (`~/.taskweave/` by default)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use taskweave_types::config::{CacheConfig, EngineConfig};

use crate::filesystem::{config_path, default_cache_dir};

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file cannot be read or parsed, logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let path = config_path(data_dir);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Directory of the persistent cache tier: the configured path, or
/// `{data_dir}/cache`. Relative configured paths are taken from `data_dir`.
pub fn resolve_cache_dir(config: &CacheConfig, data_dir: &Path) -> PathBuf {
    match &config.persistent_dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => data_dir.join(dir),
        None => default_cache_dir(data_dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.workflow.max_concurrency, 4);
        assert_eq!(config.cache.max_entries, 1_000);
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[workflow]
max_concurrency = 16
default_max_retries = 5

[cache]
persistent = false
default_ttl_secs = 60
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.workflow.max_concurrency, 16);
        assert_eq!(config.workflow.default_max_retries, 5);
        assert!(!config.cache.persistent);
        assert_eq!(config.cache.default_ttl_secs, 60);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.workflow.max_concurrency, 4);
        assert!(config.cache.persistent);
    }

    #[test]
    fn resolve_cache_dir_variants() {
        let data = Path::new("/data");
        let mut cache = CacheConfig::default();
        assert_eq!(resolve_cache_dir(&cache, data), Path::new("/data/cache"));

        cache.persistent_dir = Some(PathBuf::from("/var/cache/tw"));
        assert_eq!(resolve_cache_dir(&cache, data), Path::new("/var/cache/tw"));

        cache.persistent_dir = Some(PathBuf::from("scratch"));
        assert_eq!(resolve_cache_dir(&cache, data), Path::new("/data/scratch"));
    }
}
