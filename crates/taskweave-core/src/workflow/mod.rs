//! Workflow engine: DAG planning, bounded-concurrency batch execution,
//! retries with backoff, and progress reporting.
//!
//! - `task` -- task descriptors and the `TaskAction` port
//! - `dag` -- batch planning, cycle and unknown-dependency detection
//! - `limiter` -- FIFO permit pool and effective-concurrency calculation
//! - `retry` -- retry policy and capped exponential backoff
//! - `executor` -- single-task execution with cache, timeout, and retries
//! - `progress` -- progress snapshots and isolated observers
//! - `scheduler` -- batch-by-batch run of a whole task graph

pub mod dag;
pub mod executor;
pub mod limiter;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod task;

pub use dag::{ExecutionPlan, build_execution_plan};
pub use executor::{ExecutionScope, TaskExecutor};
pub use progress::{ProgressObserver, ProgressReporter};
pub use scheduler::{DependencyScheduler, WorkflowRun};
pub use task::{Task, TaskAction, TaskContext, action_fn};
