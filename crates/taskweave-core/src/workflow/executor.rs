//! Single-task execution: cache lookup, timeout-guarded attempts with
//! exponential backoff, and cache write-back.
//!
//! # Execution flow
//!
//! 1. If the task has a cache key and a cache is attached, a valid hit is
//!    returned immediately without invoking the action.
//! 2. Otherwise the action is attempted up to `max_retries + 1` times. Each
//!    attempt races the task timeout; panics are caught and count as failures.
//! 3. A successful value is written back to the cache under the task's tags.
//! 4. When every attempt fails, the last error becomes the result's message.
//!
//! The executor never returns an error: every outcome is a `TaskResult`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use taskweave_types::config::WorkflowConfig;
use taskweave_types::error::TaskError;
use taskweave_types::task::TaskResult;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::{Cache, SetOptions};

use super::retry::RetryPolicy;
use super::task::{Task, TaskContext};

// ---------------------------------------------------------------------------
// ExecutionScope
// ---------------------------------------------------------------------------

/// Run-wide state shared by every task execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionScope {
    pub variables: Arc<HashMap<String, Value>>,
    pub cancel: CancellationToken,
}

// ---------------------------------------------------------------------------
// TaskExecutor
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TaskExecutor {
    config: WorkflowConfig,
    cache: Option<Arc<Cache>>,
}

impl TaskExecutor {
    /// Create an executor without caching.
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.cache.as_ref()
    }

    /// Execute `task` with the values of its resolved dependencies.
    pub async fn execute(&self, task: &Task, dependencies: HashMap<String, Value>) -> TaskResult {
        self.execute_scoped(task, dependencies, &ExecutionScope::default())
            .await
    }

    /// Execute `task` within a run scope (shared variables and cancellation).
    pub async fn execute_scoped(
        &self,
        task: &Task,
        dependencies: HashMap<String, Value>,
        scope: &ExecutionScope,
    ) -> TaskResult {
        let started = Instant::now();

        if let (Some(cache), Some(key)) = (&self.cache, &task.cache_key) {
            if let Some(value) = cache.get(key).await {
                tracing::debug!(task_id = %task.id, key = %key, "task served from cache");
                return TaskResult::cached(&task.id, value, started.elapsed());
            }
        }

        let policy = RetryPolicy::from_config(&self.config, task.max_retries);
        let timeout = task.timeout.unwrap_or_else(|| self.config.default_timeout());
        let mut attempt: u32 = 0;

        loop {
            if scope.cancel.is_cancelled() {
                return cancelled_result(task, attempt, started);
            }

            let ctx = TaskContext {
                task_id: task.id.clone(),
                attempt,
                dependencies: dependencies.clone(),
                variables: Arc::clone(&scope.variables),
            };

            tracing::debug!(
                task_id = %task.id,
                attempt,
                max_attempts = policy.max_attempts(),
                "task attempt started"
            );
            let outcome = tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => Err(TaskError::Cancelled),
                res = tokio::time::timeout(timeout, AssertUnwindSafe(task.invoke(ctx)).catch_unwind()) => {
                    match res {
                        Err(_) => Err(TaskError::Timeout(timeout)),
                        Ok(Err(panic)) => Err(TaskError::Execution(panic_message(panic.as_ref()))),
                        Ok(Ok(Err(e))) => Err(TaskError::Execution(format!("{e:#}"))),
                        Ok(Ok(Ok(value))) => Ok(value),
                    }
                }
            };
            let attempts_made = attempt + 1;

            let error = match outcome {
                Ok(value) => {
                    self.write_back(task, &value).await;
                    tracing::debug!(task_id = %task.id, attempts = attempts_made, "task succeeded");
                    return TaskResult::succeeded(&task.id, value, started.elapsed(), attempts_made);
                }
                Err(TaskError::Cancelled) => return cancelled_result(task, attempts_made, started),
                Err(e) => e,
            };

            tracing::warn!(task_id = %task.id, attempt, error = %error, "task attempt failed");

            if !policy.should_retry(attempt) {
                return TaskResult::failed(&task.id, error.to_string(), started.elapsed(), attempts_made);
            }

            let delay = policy.backoff_delay(attempt);
            tracing::debug!(
                task_id = %task.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying task after backoff"
            );
            tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => return cancelled_result(task, attempts_made, started),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn write_back(&self, task: &Task, value: &Value) {
        let (Some(cache), Some(key)) = (&self.cache, &task.cache_key) else {
            return;
        };
        let options = SetOptions {
            ttl: task.cache_ttl,
            tags: task.effective_tags(),
            skip_persistent: false,
        };
        cache.set_with(key, value.clone(), options).await;
    }
}

/// A task that never started is skipped; one interrupted mid-flight failed.
fn cancelled_result(task: &Task, attempts: u32, started: Instant) -> TaskResult {
    let message = TaskError::Cancelled.to_string();
    if attempts == 0 {
        TaskResult::skipped(&task.id, message)
    } else {
        TaskResult::failed(&task.id, message, started.elapsed(), attempts)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use taskweave_types::config::CacheConfig;

    use super::*;

    fn config() -> WorkflowConfig {
        WorkflowConfig {
            default_timeout_secs: 5,
            default_max_retries: 2,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 1_000,
            ..WorkflowConfig::default()
        }
    }

    fn counting_task(id: &str, calls: Arc<AtomicU32>, succeed_on: u32) -> Task {
        Task::from_fn(id, move |ctx: TaskContext| {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= succeed_on {
                    Ok(json!({ "attempt": ctx.attempt }))
                } else {
                    anyhow::bail!("failure {n}")
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = TaskExecutor::new(config());
        let result = executor
            .execute(&counting_task("a", Arc::clone(&calls), 1), HashMap::new())
            .await;

        assert!(result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.value, Some(json!({ "attempt": 0 })));
        assert!(!result.from_cache);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_reports_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = TaskExecutor::new(config());
        let task = counting_task("flaky", Arc::clone(&calls), u32::MAX).max_retries(2);

        let result = executor.execute(&task, HashMap::new()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.error_message.as_deref(), Some("failure 3"));
        assert!(result.value.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = TaskExecutor::new(config());
        let task = counting_task("eventually", Arc::clone(&calls), 3);

        let result = executor.execute(&task, HashMap::new()).await;

        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.value, Some(json!({ "attempt": 2 })));
        // 100ms after attempt 0, 200ms after attempt 1.
        assert!(result.duration >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failed_attempt() {
        let executor = TaskExecutor::new(config());
        let task = Task::from_fn("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!("late"))
        })
        .timeout(Duration::from_secs(1))
        .max_retries(0);

        let result = executor.execute(&task, HashMap::new()).await;

        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("task timed out after 1000ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_contained() {
        let executor = TaskExecutor::new(config());
        let task = Task::from_fn("boom", |_| async {
            if true {
                panic!("exploded");
            }
            Ok(json!(null))
        })
        .max_retries(0);

        let result = executor.execute(&task, HashMap::new()).await;

        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("task panicked: exploded"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_action() {
        let cache = Arc::new(Cache::new(&CacheConfig::default()));
        cache
            .set("score:v1", json!(97), None, Vec::<String>::new())
            .await;

        let calls = Arc::new(AtomicU32::new(0));
        let executor = TaskExecutor::new(config()).with_cache(Arc::clone(&cache));
        let task = counting_task("score", Arc::clone(&calls), 1).cache_key("score:v1");

        let result = executor.execute(&task, HashMap::new()).await;

        assert!(result.success);
        assert!(result.from_cache);
        assert_eq!(result.value, Some(json!(97)));
        assert_eq!(result.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_is_written_back_with_default_tags() {
        let cache = Arc::new(Cache::new(&CacheConfig::default()));
        let executor = TaskExecutor::new(config()).with_cache(Arc::clone(&cache));
        let task = Task::from_fn("seo-audit", |_| async { Ok(json!({"score": 80})) })
            .cache_key("audit:example.com");

        let first = executor.execute(&task, HashMap::new()).await;
        let second = executor.execute(&task, HashMap::new()).await;

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(cache.keys_for_tag("seo-audit"), vec!["audit:example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = Arc::new(Cache::new(&CacheConfig::default()));
        let executor = TaskExecutor::new(config()).with_cache(Arc::clone(&cache));
        let task = Task::from_fn("bad", |_| async { anyhow::bail!("nope") })
            .cache_key("bad")
            .max_retries(0);

        executor.execute(&task, HashMap::new()).await;
        assert!(!cache.has("bad").await);
    }

    #[tokio::test]
    async fn test_dependencies_and_variables_reach_action() {
        let executor = TaskExecutor::new(config());
        let task = Task::from_fn("greet", |ctx: TaskContext| async move {
            let name = ctx.dependency("name").cloned().unwrap_or_default();
            let greeting = ctx.variable("greeting").cloned().unwrap_or_default();
            Ok(json!([greeting, name]))
        });

        let scope = ExecutionScope {
            variables: Arc::new(HashMap::from([("greeting".to_string(), json!("hello"))])),
            ..ExecutionScope::default()
        };
        let deps = HashMap::from([("name".to_string(), json!("ada"))]);

        let result = executor.execute_scoped(&task, deps, &scope).await;
        assert_eq!(result.value, Some(json!(["hello", "ada"])));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_skipped() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = TaskExecutor::new(config());
        let scope = ExecutionScope::default();
        scope.cancel.cancel();

        let result = executor
            .execute_scoped(&counting_task("a", Arc::clone(&calls), 1), HashMap::new(), &scope)
            .await;

        assert!(result.skipped);
        assert_eq!(result.error_message.as_deref(), Some("workflow cancelled"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
