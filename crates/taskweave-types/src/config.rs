//! Engine configuration types for Taskweave.
//!
//! `EngineConfig` represents the top-level `config.toml`. Every field has a
//! default, so an empty file (or no file at all) yields a working engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration consumed when constructing a scheduler and cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Scheduler and executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Upper bound on concurrently running tasks within a batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Also cap concurrency at the available hardware parallelism.
    #[serde(default = "default_true")]
    pub adaptive_concurrency: bool,
    /// Per-attempt timeout for tasks that do not set their own.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Retries after the first attempt for tasks that do not set their own.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            adaptive_concurrency: true,
            default_timeout_secs: default_timeout_secs(),
            default_max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl WorkflowConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Two-tier cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// When false, executors bypass the cache entirely.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Capacity of the in-process tier.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Enable the on-disk tier.
    #[serde(default = "default_true")]
    pub persistent: bool,
    /// Directory for the on-disk tier. Resolved to `{data_dir}/cache` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_dir: Option<PathBuf>,
    /// Size budget for the on-disk tier; pruning brings usage back to 80%.
    #[serde(default = "default_persistent_max_bytes")]
    pub persistent_max_bytes: u64,
    #[serde(default = "default_housekeeping_interval_secs")]
    pub housekeeping_interval_secs: u64,
    /// Share one factory invocation among concurrent misses for the same key.
    #[serde(default)]
    pub single_flight: bool,
}

fn default_max_entries() -> usize {
    1_000
}

fn default_ttl_secs() -> u64 {
    3_600
}

fn default_persistent_max_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_housekeeping_interval_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            default_ttl_secs: default_ttl_secs(),
            persistent: true,
            persistent_dir: None,
            persistent_max_bytes: default_persistent_max_bytes(),
            housekeeping_interval_secs: default_housekeeping_interval_secs(),
            single_flight: false,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs)
    }
}
