//! Workflow files: TOML task lists whose actions run shell commands.
//!
//! ```toml
//! [variables]
//! region = "eu"
//!
//! [[task]]
//! id = "fetch"
//! command = "curl -s https://example.com/data.json"
//! cache_key = "fetch-eu"
//! tags = ["remote"]
//!
//! [[task]]
//! id = "count"
//! command = "echo \"$TASKWEAVE_DEP_FETCH\" | wc -c"
//! depends_on = ["fetch"]
//! ```
//!
//! A task's command sees the stdout of each direct dependency in
//! `TASKWEAVE_DEP_<ID>` and every run variable in `TASKWEAVE_VAR_<NAME>`.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Value, json};
use taskweave_core::workflow::{Task, TaskAction, TaskContext};

/// Parsed workflow file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowFile {
    /// Run variables exposed to every command.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskEntry>,
}

/// One `[[task]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEntry {
    pub id: String,
    pub name: Option<String>,
    pub command: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub cache_key: Option<String>,
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl WorkflowFile {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a workflow file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid workflow file {}", path.display()))
    }

    /// Build executable tasks, one per entry, in file order.
    pub fn to_tasks(&self) -> Vec<Task> {
        self.tasks.iter().map(TaskEntry::to_task).collect()
    }
}

impl TaskEntry {
    pub fn to_task(&self) -> Task {
        let mut task = Task::new(self.id.clone(), CommandAction::new(self.command.clone()))
            .depends_on(self.depends_on.iter().cloned())
            .priority(self.priority)
            .tags(self.tags.iter().cloned());

        if let Some(name) = &self.name {
            task = task.name(name.clone());
        }
        if let Some(secs) = self.timeout_secs {
            task = task.timeout(Duration::from_secs(secs));
        }
        if let Some(retries) = self.max_retries {
            task = task.max_retries(retries);
        }
        if let Some(key) = &self.cache_key {
            task = task.cache_key(key.clone());
        }
        if let Some(secs) = self.cache_ttl_secs {
            task = task.cache_ttl(Duration::from_secs(secs));
        }
        task
    }
}

// ---------------------------------------------------------------------------
// Shell command action
// ---------------------------------------------------------------------------

/// Runs a command line through the platform shell.
///
/// Yields `{ "stdout", "stderr", "exit_code" }`; a non-zero exit is an error.
/// The child is killed if the attempt is dropped (timeout or cancellation).
#[derive(Debug, Clone)]
pub struct CommandAction {
    command: String,
}

impl CommandAction {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl TaskAction for CommandAction {
    fn run(&self, ctx: TaskContext) -> impl Future<Output = Result<Value>> + Send {
        let command = self.command.clone();
        async move { run_shell(&command, &ctx).await }
    }
}

async fn run_shell(command: &str, ctx: &TaskContext) -> Result<Value> {
    let mut cmd = shell_command(command);
    cmd.stdin(Stdio::null())
        .kill_on_drop(true)
        .env("TASKWEAVE_TASK_ID", &ctx.task_id)
        .env("TASKWEAVE_ATTEMPT", ctx.attempt.to_string());

    for (id, value) in &ctx.dependencies {
        cmd.env(env_var_name("TASKWEAVE_DEP_", id), stdout_text(value));
    }
    for (name, value) in ctx.variables.iter() {
        cmd.env(env_var_name("TASKWEAVE_VAR_", name), plain_text(value));
    }

    tracing::debug!(task_id = %ctx.task_id, attempt = ctx.attempt, command, "spawning command");

    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to spawn '{command}'"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let detail = stderr.trim();
        if detail.is_empty() {
            bail!("command exited with status {code}");
        }
        bail!("command exited with status {code}: {detail}");
    }

    Ok(json!({
        "stdout": stdout,
        "stderr": stderr,
        "exit_code": output.status.code(),
    }))
}

#[cfg(unix)]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// `prefix` + id uppercased, with every non-alphanumeric character as `_`.
pub fn env_var_name(prefix: &str, id: &str) -> String {
    let suffix: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{prefix}{suffix}")
}

/// Text handed to dependents: the dependency's stdout without the trailing newline.
fn stdout_text(value: &Value) -> String {
    match value.get("stdout").and_then(Value::as_str) {
        Some(stdout) => stdout.trim_end_matches(['\r', '\n']).to_string(),
        None => plain_text(value),
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const SAMPLE: &str = r#"
[variables]
region = "eu"
shards = 3

[[task]]
id = "fetch"
name = "Fetch data"
command = "echo fetched"
priority = 5
timeout_secs = 30
max_retries = 1
cache_key = "fetch-eu"
cache_ttl_secs = 600
tags = ["remote"]

[[task]]
id = "report-2"
command = "echo done"
depends_on = ["fetch"]
"#;

    #[test]
    fn parse_reads_tasks_and_variables() {
        let file = WorkflowFile::parse(SAMPLE).unwrap();
        assert_eq!(file.tasks.len(), 2);
        assert_eq!(file.variables.get("region"), Some(&json!("eu")));
        assert_eq!(file.variables.get("shards"), Some(&json!(3)));

        let tasks = file.to_tasks();
        let fetch = &tasks[0];
        assert_eq!(fetch.id, "fetch");
        assert_eq!(fetch.name, "Fetch data");
        assert_eq!(fetch.priority, 5);
        assert_eq!(fetch.timeout, Some(Duration::from_secs(30)));
        assert_eq!(fetch.max_retries, Some(1));
        assert_eq!(fetch.cache_key.as_deref(), Some("fetch-eu"));
        assert_eq!(fetch.cache_ttl, Some(Duration::from_secs(600)));

        let report = &tasks[1];
        assert!(report.dependencies.contains("fetch"));
        assert_eq!(report.timeout, None);
        assert!(report.cache_key.is_none());
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let err = WorkflowFile::parse("[[task]]\nid = \"a\"\ncommand = \"true\"\nretries = 2\n");
        assert!(err.is_err());
    }

    #[test]
    fn parse_requires_command() {
        assert!(WorkflowFile::parse("[[task]]\nid = \"a\"\n").is_err());
    }

    #[test]
    fn env_var_name_normalizes_ids() {
        assert_eq!(env_var_name("TASKWEAVE_DEP_", "fetch"), "TASKWEAVE_DEP_FETCH");
        assert_eq!(env_var_name("TASKWEAVE_DEP_", "report-2.v1"), "TASKWEAVE_DEP_REPORT_2_V1");
    }

    #[test]
    fn stdout_text_prefers_command_stdout() {
        assert_eq!(stdout_text(&json!({"stdout": "abc\n", "exit_code": 0})), "abc");
        assert_eq!(stdout_text(&json!("raw")), "raw");
        assert_eq!(stdout_text(&json!(42)), "42");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_action_captures_output() {
        let value = CommandAction::new("echo hello; echo oops >&2")
            .run(TaskContext::default())
            .await
            .unwrap();
        assert_eq!(value["stdout"], json!("hello\n"));
        assert_eq!(value["stderr"], json!("oops\n"));
        assert_eq!(value["exit_code"], json!(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_action_fails_on_non_zero_exit() {
        let err = CommandAction::new("echo broken >&2; exit 3")
            .run(TaskContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "command exited with status 3: broken");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_action_sees_dependencies_and_variables() {
        let ctx = TaskContext {
            task_id: "sum".into(),
            attempt: 0,
            dependencies: HashMap::from([("fetch".to_string(), json!({"stdout": "41\n"}))]),
            variables: Arc::new(HashMap::from([("region".to_string(), json!("eu"))])),
        };
        let value = CommandAction::new("echo \"$TASKWEAVE_DEP_FETCH-$TASKWEAVE_VAR_REGION-$TASKWEAVE_TASK_ID\"")
            .run(ctx)
            .await
            .unwrap();
        assert_eq!(value["stdout"], json!("41-eu-sum\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn workflow_file_runs_through_scheduler() {
        use taskweave_core::workflow::DependencyScheduler;
        use taskweave_types::config::WorkflowConfig;

        let file = WorkflowFile::parse(
            r#"
[[task]]
id = "a"
command = "echo 20"

[[task]]
id = "b"
command = "echo $((TASKWEAVE_DEP_A + 1))"
depends_on = ["a"]
"#,
        )
        .unwrap();

        let scheduler = DependencyScheduler::new(WorkflowConfig::default());
        let run = scheduler
            .run(&file.to_tasks(), file.variables.clone())
            .await
            .unwrap();
        assert!(run.is_success());
        assert_eq!(run.result("b").unwrap().value.as_ref().unwrap()["stdout"], json!("21\n"));
    }
}
