//! Data directory layout.

use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TASKWEAVE_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `TASKWEAVE_DATA_DIR` environment variable
/// 2. `~/.taskweave`
/// 3. `./.taskweave`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".taskweave");
    }

    PathBuf::from(".taskweave")
}

/// `{data_dir}/config.toml`
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Default location of the persistent cache tier: `{data_dir}/cache`.
pub fn default_cache_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("cache")
}
