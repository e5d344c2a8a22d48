//! Workflow progress snapshots delivered to progress observers.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of a running workflow.
///
/// Recomputed on every state change; never mutated in place by observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// Task ids currently dispatched and not yet finished.
    pub currently_running: BTreeSet<String>,
    /// `(completed + failed) / total * 100`, or 0 when `total` is 0.
    pub percent_complete: f64,
    /// Absent until at least one task has completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_completion_time: Option<DateTime<Utc>>,
}

impl WorkflowProgress {
    /// Progress of a run that has not started anything yet.
    pub fn empty(total_tasks: usize) -> Self {
        Self {
            total_tasks,
            completed_tasks: 0,
            failed_tasks: 0,
            currently_running: BTreeSet::new(),
            percent_complete: 0.0,
            estimated_completion_time: None,
        }
    }

    /// Tasks that have produced a result, successful or not.
    pub fn finished_tasks(&self) -> usize {
        self.completed_tasks + self.failed_tasks
    }

    /// Tasks without a result yet.
    pub fn remaining_tasks(&self) -> usize {
        self.total_tasks.saturating_sub(self.finished_tasks())
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_tasks() == 0
    }
}
