use std::time::Duration;

use thiserror::Error;

/// Graph-structural errors. These abort a run before any task executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("cycle detected among tasks: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("duplicate task id '{0}'")]
    DuplicateTask(String),
}

/// Per-attempt task errors. Always isolated into the task's result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{0}")]
    Execution(String),

    #[error("workflow cancelled")]
    Cancelled,

    #[error("dependency '{0}' failed")]
    DependencyFailed(String),
}

/// Persistent-tier errors. Logged and swallowed by the cache facade.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),

    #[error("cache disabled")]
    Disabled,
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_lists_tasks() {
        let err = WorkflowError::CycleDetected(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "cycle detected among tasks: a, b");
    }

    #[test]
    fn test_unknown_dependency_display() {
        let err = WorkflowError::UnknownDependency {
            task: "publish".into(),
            dependency: "draft".into(),
        };
        assert_eq!(
            err.to_string(),
            "task 'publish' depends on unknown task 'draft'"
        );
    }

    #[test]
    fn test_task_error_display() {
        assert_eq!(
            TaskError::Timeout(Duration::from_millis(1500)).to_string(),
            "task timed out after 1500ms"
        );
        assert_eq!(TaskError::Execution("boom".into()).to_string(), "boom");
        assert_eq!(
            TaskError::DependencyFailed("a".into()).to_string(),
            "dependency 'a' failed"
        );
    }

    #[test]
    fn test_cache_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CacheError = io.into();
        assert!(matches!(err, CacheError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }
}
