//! Progress reporting for a workflow run.
//!
//! The reporter recomputes a [`WorkflowProgress`] snapshot on every state
//! change and hands it to each registered observer. Observers are isolated:
//! an error or panic in one is logged and never reaches the scheduler or the
//! other observers.

use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use taskweave_types::progress::WorkflowProgress;

use crate::clock::{Clock, SystemClock};

/// Receives progress snapshots.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &WorkflowProgress) -> anyhow::Result<()>;
}

impl<F> ProgressObserver for F
where
    F: Fn(&WorkflowProgress) -> anyhow::Result<()> + Send + Sync,
{
    fn on_progress(&self, progress: &WorkflowProgress) -> anyhow::Result<()> {
        self(progress)
    }
}

pub struct ProgressReporter {
    observers: Vec<Arc<dyn ProgressObserver>>,
    clock: Arc<dyn Clock>,
    duration_total: Duration,
    duration_count: u32,
    latest: WorkflowProgress,
}

impl ProgressReporter {
    pub fn new(total_tasks: usize) -> Self {
        Self {
            observers: Vec::new(),
            clock: Arc::new(SystemClock),
            duration_total: Duration::ZERO,
            duration_count: 0,
            latest: WorkflowProgress::empty(total_tasks),
        }
    }

    pub fn with_observers(mut self, observers: Vec<Arc<dyn ProgressObserver>>) -> Self {
        self.observers = observers;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn subscribe(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    /// Feed a completed task's duration into the completion estimate.
    pub fn record_duration(&mut self, duration: Duration) {
        self.duration_total = self.duration_total.saturating_add(duration);
        self.duration_count += 1;
    }

    pub fn mean_duration(&self) -> Option<Duration> {
        (self.duration_count > 0).then(|| self.duration_total / self.duration_count)
    }

    /// Recompute the snapshot and notify every observer.
    pub fn notify(
        &mut self,
        total: usize,
        completed: usize,
        failed: usize,
        running: &BTreeSet<String>,
    ) -> &WorkflowProgress {
        let finished = completed + failed;
        let percent_complete = if total == 0 {
            0.0
        } else {
            finished as f64 / total as f64 * 100.0
        };

        let remaining = u32::try_from(total.saturating_sub(finished)).unwrap_or(u32::MAX);
        let estimated_completion_time = self.mean_duration().and_then(|mean| {
            let left = TimeDelta::from_std(mean.saturating_mul(remaining)).ok()?;
            self.clock.now().checked_add_signed(left)
        });

        self.latest = WorkflowProgress {
            total_tasks: total,
            completed_tasks: completed,
            failed_tasks: failed,
            currently_running: running.clone(),
            percent_complete,
            estimated_completion_time,
        };

        for (i, observer) in self.observers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| observer.on_progress(&self.latest))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(observer = i, error = %e, "progress observer failed");
                }
                Err(_) => {
                    tracing::warn!(observer = i, "progress observer panicked");
                }
            }
        }

        &self.latest
    }

    pub fn snapshot(&self) -> WorkflowProgress {
        self.latest.clone()
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("observers", &self.observers.len())
            .field("latest", &self.latest)
            .finish_non_exhaustive()
    }
}
