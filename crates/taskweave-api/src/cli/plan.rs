//! `tweave plan`: validate a workflow file and show its execution batches.

use std::path::Path;

use anyhow::Result;
use console::style;
use taskweave_core::workflow::build_execution_plan;

use super::workflow_file::WorkflowFile;

/// Print the batch plan, or fail with the graph error (cycle, unknown or
/// duplicate id).
pub async fn show_plan(path: &Path, json: bool) -> Result<()> {
    let file = WorkflowFile::load(path).await?;
    let tasks = file.to_tasks();
    let plan = build_execution_plan(&tasks)?;

    if json {
        let out = serde_json::json!({
            "tasks": plan.task_count(),
            "batches": plan.batches,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} tasks in {} batches",
        style("Plan").bold(),
        style(plan.task_count()).cyan(),
        style(plan.len()).cyan(),
    );
    println!();

    for (index, batch) in plan.batches.iter().enumerate() {
        println!("  {} {}", style(format!("{:>3}.", index + 1)).dim(), batch.join(", "));
    }
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write(tmp: &TempDir, content: &str) -> std::path::PathBuf {
        let path = tmp.path().join("flow.toml");
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn show_plan_accepts_valid_workflow() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "[[task]]\nid = \"a\"\ncommand = \"true\"\n\n[[task]]\nid = \"b\"\ncommand = \"true\"\ndepends_on = [\"a\"]\n",
        )
        .await;
        show_plan(&path, true).await.unwrap();
    }

    #[tokio::test]
    async fn show_plan_reports_cycle() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "[[task]]\nid = \"a\"\ncommand = \"true\"\ndepends_on = [\"b\"]\n\n[[task]]\nid = \"b\"\ncommand = \"true\"\ndepends_on = [\"a\"]\n",
        )
        .await;
        let err = show_plan(&path, true).await.unwrap_err();
        assert_eq!(err.to_string(), "cycle detected among tasks: a, b");
    }

    #[tokio::test]
    async fn show_plan_reports_unknown_dependency() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "[[task]]\nid = \"a\"\ncommand = \"true\"\ndepends_on = [\"ghost\"]\n").await;
        let err = show_plan(&path, true).await.unwrap_err();
        assert_eq!(err.to_string(), "task 'a' depends on unknown task 'ghost'");
    }

    #[tokio::test]
    async fn show_plan_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(show_plan(&tmp.path().join("nope.toml"), true).await.is_err());
    }
}
