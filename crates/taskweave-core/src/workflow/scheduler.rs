//! Dependency scheduler: batch-by-batch execution of a task graph.
//!
//! The scheduler plans the graph into batches (see [`super::dag`]), then runs
//! the batches in order. Within a batch, tasks are dispatched in priority
//! order: a limiter permit is acquired for each task before it is spawned on
//! a `JoinSet`, and the permit travels with the spawned future. The next
//! batch starts only once every task of the current one has a result.
//!
//! A task whose dependency failed (or was itself skipped) is never invoked
//! and gets a skipped result; independent branches keep running. Cancelling
//! the run skips everything not yet started, so every submitted task still
//! ends up with exactly one result.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;
use taskweave_types::config::{EngineConfig, WorkflowConfig};
use taskweave_types::error::{TaskError, WorkflowError};
use taskweave_types::task::{TaskResult, WorkflowSummary};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::Cache;
use crate::clock::{Clock, SystemClock};

use super::dag::{ExecutionPlan, build_execution_plan};
use super::executor::{ExecutionScope, TaskExecutor};
use super::limiter::{ConcurrencyLimiter, effective_concurrency};
use super::progress::{ProgressObserver, ProgressReporter};
use super::task::Task;

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

/// Output of a finished run: one result per submitted task, plus a summary.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub results: HashMap<String, TaskResult>,
    pub summary: WorkflowSummary,
}

impl WorkflowRun {
    pub fn result(&self, task_id: &str) -> Option<&TaskResult> {
        self.results.get(task_id)
    }

    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Result accumulator and progress counters owned by a single run.
struct RunState {
    total: usize,
    results: HashMap<String, TaskResult>,
    completed: usize,
    failed: usize,
    reporter: ProgressReporter,
}

impl RunState {
    fn record(&mut self, result: TaskResult, running: &BTreeSet<String>) {
        // Only completed tasks feed the estimate.
        if result.success {
            self.completed += 1;
            self.reporter.record_duration(result.duration);
        } else {
            self.failed += 1;
        }
        self.results.insert(result.task_id.clone(), result);
        self.notify(running);
    }

    fn notify(&mut self, running: &BTreeSet<String>) {
        self.reporter
            .notify(self.total, self.completed, self.failed, running);
    }

    /// First dependency of `task` that did not succeed.
    fn failed_dependency<'t>(&self, task: &'t Task) -> Option<&'t String> {
        task.dependencies
            .iter()
            .find(|dep| self.results.get(dep.as_str()).is_none_or(|r| !r.success))
    }

    fn dependency_values(&self, task: &Task) -> HashMap<String, Value> {
        task.dependencies
            .iter()
            .filter_map(|dep| {
                let value = self.results.get(dep)?.value.clone()?;
                Some((dep.clone(), value))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// DependencyScheduler
// ---------------------------------------------------------------------------

pub struct DependencyScheduler {
    executor: Arc<TaskExecutor>,
    config: WorkflowConfig,
    observers: Vec<Arc<dyn ProgressObserver>>,
    clock: Arc<dyn Clock>,
}

impl DependencyScheduler {
    /// Create a scheduler without caching.
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            executor: Arc::new(TaskExecutor::new(config.clone())),
            config,
            observers: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a scheduler whose executor consults `cache`.
    pub fn with_cache(config: WorkflowConfig, cache: Arc<Cache>) -> Self {
        let mut scheduler = Self::new(config.clone());
        scheduler.executor = Arc::new(TaskExecutor::new(config).with_cache(cache));
        scheduler
    }

    /// Build from engine configuration. The cache is attached only when
    /// caching is enabled.
    pub fn from_config(config: &EngineConfig, cache: Option<Arc<Cache>>) -> Self {
        match cache {
            Some(cache) if config.cache.enabled => Self::with_cache(config.workflow.clone(), cache),
            _ => Self::new(config.workflow.clone()),
        }
    }

    /// Clock used for completion estimates.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register an observer for progress snapshots of every subsequent run.
    pub fn subscribe(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Validate `tasks` and return the batch plan without running anything.
    pub fn plan(&self, tasks: &[Task]) -> Result<ExecutionPlan, WorkflowError> {
        build_execution_plan(tasks)
    }

    /// Run every task to a result.
    ///
    /// Only graph errors (cycle, unknown or duplicate id) are returned as
    /// `Err`, before any task executes. Task failures live in the results.
    pub async fn run(
        &self,
        tasks: &[Task],
        variables: HashMap<String, Value>,
    ) -> Result<WorkflowRun, WorkflowError> {
        self.run_with_cancel(tasks, variables, CancellationToken::new())
            .await
    }

    /// [`run`](Self::run) with cooperative cancellation.
    pub async fn run_with_cancel(
        &self,
        tasks: &[Task],
        variables: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<WorkflowRun, WorkflowError> {
        let plan = build_execution_plan(tasks)?;
        let run_id = Uuid::now_v7();
        let started = Instant::now();
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        let scope = ExecutionScope {
            variables: Arc::new(variables),
            cancel,
        };
        let mut state = RunState {
            total: tasks.len(),
            results: HashMap::with_capacity(tasks.len()),
            completed: 0,
            failed: 0,
            reporter: ProgressReporter::new(tasks.len())
                .with_observers(self.observers.clone())
                .with_clock(Arc::clone(&self.clock)),
        };

        tracing::info!(
            run_id = %run_id,
            tasks = tasks.len(),
            batches = plan.len(),
            "workflow run started"
        );
        state.notify(&BTreeSet::new());

        let mut batches_started = 0;
        for (batch_idx, batch) in plan.batches.iter().enumerate() {
            let mut runnable = Vec::with_capacity(batch.len());
            for id in batch {
                let Some(&task) = by_id.get(id.as_str()) else {
                    continue;
                };
                if scope.cancel.is_cancelled() {
                    state.record(
                        TaskResult::skipped(&task.id, TaskError::Cancelled.to_string()),
                        &BTreeSet::new(),
                    );
                } else if let Some(dep) = state.failed_dependency(task) {
                    let reason = TaskError::DependencyFailed(dep.clone()).to_string();
                    tracing::debug!(run_id = %run_id, task_id = %task.id, dependency = %dep, "skipping task");
                    state.record(TaskResult::skipped(&task.id, reason), &BTreeSet::new());
                } else {
                    runnable.push(task);
                }
            }

            if runnable.is_empty() {
                continue;
            }
            batches_started += 1;
            self.run_batch(run_id, batch_idx, runnable, &scope, &mut state)
                .await;
        }

        let summary = WorkflowSummary::from_results(run_id, &state.results, started.elapsed(), batches_started);
        tracing::info!(
            run_id = %run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cache_hits = summary.cache_hits,
            duration_ms = summary.duration.as_millis() as u64,
            "workflow run finished"
        );

        Ok(WorkflowRun {
            results: state.results,
            summary,
        })
    }

    /// Run one batch to completion under a fresh limiter.
    async fn run_batch(
        &self,
        run_id: Uuid,
        batch_idx: usize,
        runnable: Vec<&Task>,
        scope: &ExecutionScope,
        state: &mut RunState,
    ) {
        let concurrency = effective_concurrency(
            self.config.max_concurrency,
            runnable.len(),
            self.config.adaptive_concurrency,
        );
        let limiter = ConcurrencyLimiter::new(concurrency);
        let batch_ids: Vec<String> = runnable.iter().map(|t| t.id.clone()).collect();

        tracing::debug!(
            run_id = %run_id,
            batch = batch_idx,
            tasks = runnable.len(),
            concurrency,
            "batch started"
        );

        let mut pending = runnable.into_iter();
        let mut next = pending.next();
        let mut running: BTreeSet<String> = BTreeSet::new();
        let mut join_set: JoinSet<TaskResult> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = scope.cancel.cancelled(), if next.is_some() => {
                    for task in next.take().into_iter().chain(pending.by_ref()) {
                        state.record(
                            TaskResult::skipped(&task.id, TaskError::Cancelled.to_string()),
                            &running,
                        );
                    }
                }
                Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                    match joined {
                        Ok(result) => {
                            running.remove(&result.task_id);
                            tracing::debug!(
                                run_id = %run_id,
                                task_id = %result.task_id,
                                success = result.success,
                                from_cache = result.from_cache,
                                "task finished"
                            );
                            state.record(result, &running);
                        }
                        Err(e) => {
                            tracing::warn!(run_id = %run_id, error = %e, "task join error");
                        }
                    }
                }
                Ok(permit) = limiter.acquire(), if next.is_some() => {
                    if let Some(task) = next.take() {
                        let task = task.clone();
                        let executor = Arc::clone(&self.executor);
                        let scope = scope.clone();
                        let dependencies = state.dependency_values(&task);

                        running.insert(task.id.clone());
                        state.notify(&running);
                        join_set.spawn(async move {
                            let _permit = permit;
                            executor.execute_scoped(&task, dependencies, &scope).await
                        });
                    }
                    next = pending.next();
                }
                else => break,
            }
        }

        // A task whose future was lost to a join error still needs a result.
        for id in batch_ids {
            if !state.results.contains_key(&id) {
                running.remove(&id);
                state.record(TaskResult::failed(&id, "task aborted", std::time::Duration::ZERO, 0), &running);
            }
        }
    }
}

impl std::fmt::Debug for DependencyScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyScheduler")
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
