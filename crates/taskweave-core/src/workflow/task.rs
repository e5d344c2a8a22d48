//! Task descriptors and the action port.
//!
//! A `Task` is an immutable description of one unit of work: its id, its
//! dependencies, scheduling hints (priority, timeout, retries), and optional
//! cache settings. The work itself is a `TaskAction`, either a closure wrapped
//! with [`action_fn`] or any type implementing the trait.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// Input handed to a task action on each attempt.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub task_id: String,
    /// 0-based attempt index.
    pub attempt: u32,
    /// Values produced by this task's direct dependencies, keyed by task id.
    pub dependencies: HashMap<String, Value>,
    /// Caller-supplied execution context shared by every task in the run.
    pub variables: Arc<HashMap<String, Value>>,
}

impl TaskContext {
    pub fn dependency(&self, task_id: &str) -> Option<&Value> {
        self.dependencies.get(task_id)
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

// ---------------------------------------------------------------------------
// TaskAction port
// ---------------------------------------------------------------------------

/// The unit of work a task performs.
///
/// Uses RPITIT like the other ports in this crate. Errors are reported with
/// `anyhow` so actions can bubble up anything; the executor records the
/// error's display chain as the task's error message.
pub trait TaskAction: Send + Sync {
    fn run(&self, ctx: TaskContext) -> impl Future<Output = anyhow::Result<Value>> + Send;
}

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`TaskAction`]; blanket-implemented for every action.
pub trait TaskActionDyn: Send + Sync {
    fn run_boxed(&self, ctx: TaskContext) -> BoxFuture<'_, anyhow::Result<Value>>;
}

impl<T: TaskAction> TaskActionDyn for T {
    fn run_boxed(&self, ctx: TaskContext) -> BoxFuture<'_, anyhow::Result<Value>> {
        Box::pin(self.run(ctx))
    }
}

/// Adapter turning an async closure into a [`TaskAction`].
pub struct FnAction<F>(F);

impl<F, Fut> TaskAction for FnAction<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    fn run(&self, ctx: TaskContext) -> impl Future<Output = anyhow::Result<Value>> + Send {
        (self.0)(ctx)
    }
}

/// Wrap `f` as a task action.
pub fn action_fn<F, Fut>(f: F) -> FnAction<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    FnAction(f)
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Immutable task descriptor. Cloning is cheap; the action is shared.
#[derive(Clone)]
pub struct Task {
    pub id: String,
    pub name: String,
    action: Arc<dyn TaskActionDyn>,
    pub dependencies: BTreeSet<String>,
    /// Higher runs earlier within a batch.
    pub priority: i32,
    /// Per-attempt timeout; the workflow default applies when unset.
    pub timeout: Option<Duration>,
    /// Retries after the first attempt; the workflow default applies when unset.
    pub max_retries: Option<u32>,
    pub cache_key: Option<String>,
    pub cache_ttl: Option<Duration>,
    pub tags: BTreeSet<String>,
}

impl Task {
    pub fn new<A: TaskAction + 'static>(id: impl Into<String>, action: A) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            action: Arc::new(action),
            dependencies: BTreeSet::new(),
            priority: 0,
            timeout: None,
            max_retries: None,
            cache_key: None,
            cache_ttl: None,
            tags: BTreeSet::new(),
        }
    }

    /// Shorthand for `Task::new(id, action_fn(f))`.
    pub fn from_fn<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(id, action_fn(f))
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Cache tags for this task's result; `{id}` when none were given.
    pub fn effective_tags(&self) -> BTreeSet<String> {
        if self.tags.is_empty() {
            BTreeSet::from([self.id.clone()])
        } else {
            self.tags.clone()
        }
    }

    pub(crate) fn invoke(&self, ctx: TaskContext) -> BoxFuture<'_, anyhow::Result<Value>> {
        self.action.run_boxed(ctx)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("cache_key", &self.cache_key)
            .field("cache_ttl", &self.cache_ttl)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}
