//! Task outcome types.
//!
//! `TaskResult` is produced exactly once per submitted task, whether the task
//! succeeded, failed after exhausting its retries, was served from cache, or
//! never ran because an upstream dependency failed. `WorkflowSummary`
//! aggregates a finished run.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Outcome of a single task within a workflow run.
///
/// Exactly one of `value` / `error_message` is present: `value` iff `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Wall time from first attempt start to final attempt end.
    #[serde(with = "crate::serde_millis")]
    pub duration: Duration,
    /// True when the value came from the cache without invoking the action.
    pub from_cache: bool,
    /// Number of action invocations (0 for cache hits and skipped tasks).
    pub attempts: u32,
    /// True when the task never ran (failed dependency or cancelled run).
    #[serde(default)]
    pub skipped: bool,
}

impl TaskResult {
    /// A successful, freshly computed result.
    pub fn succeeded(task_id: impl Into<String>, value: Value, duration: Duration, attempts: u32) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            value: Some(value),
            error_message: None,
            duration,
            from_cache: false,
            attempts,
            skipped: false,
        }
    }

    /// A successful result served from the cache.
    pub fn cached(task_id: impl Into<String>, value: Value, duration: Duration) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            value: Some(value),
            error_message: None,
            duration,
            from_cache: true,
            attempts: 0,
            skipped: false,
        }
    }

    /// A terminal failure after all attempts were used.
    pub fn failed(
        task_id: impl Into<String>,
        error_message: impl Into<String>,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            value: None,
            error_message: Some(error_message.into()),
            duration,
            from_cache: false,
            attempts,
            skipped: false,
        }
    }

    /// A task that was never invoked.
    pub fn skipped(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            value: None,
            error_message: Some(reason.into()),
            duration: Duration::ZERO,
            from_cache: false,
            attempts: 0,
            skipped: true,
        }
    }
}

/// Aggregate statistics over a finished workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub run_id: Uuid,
    pub total_tasks: usize,
    pub succeeded: usize,
    /// Tasks that ran and failed (skipped tasks are counted separately).
    pub failed: usize,
    pub skipped: usize,
    pub cache_hits: usize,
    #[serde(with = "crate::serde_millis")]
    pub duration: Duration,
    /// Number of batches that were started.
    pub batches: usize,
}

impl WorkflowSummary {
    /// Tally a result map into a summary.
    pub fn from_results(
        run_id: Uuid,
        results: &HashMap<String, TaskResult>,
        duration: Duration,
        batches: usize,
    ) -> Self {
        let mut summary = Self {
            run_id,
            total_tasks: results.len(),
            succeeded: 0,
            failed: 0,
            skipped: 0,
            cache_hits: 0,
            duration,
            batches,
        };
        for result in results.values() {
            if result.success {
                summary.succeeded += 1;
                if result.from_cache {
                    summary.cache_hits += 1;
                }
            } else if result.skipped {
                summary.skipped += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }

    /// True when every task succeeded.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}
