//! `tweave run`: execute a workflow file with a live progress bar.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use taskweave_core::workflow::{DependencyScheduler, WorkflowRun};
use taskweave_types::progress::WorkflowProgress;
use taskweave_types::task::TaskResult;
use tokio_util::sync::CancellationToken;

use super::workflow_file::WorkflowFile;
use crate::state::AppState;

/// Run the workflow at `path`. Returns whether every task succeeded.
pub async fn run_workflow(
    state: &AppState,
    path: &Path,
    concurrency: Option<usize>,
    no_cache: bool,
    json: bool,
    quiet: bool,
) -> Result<bool> {
    let file = WorkflowFile::load(path).await?;
    let tasks = file.to_tasks();

    let mut config = state.config.clone();
    if let Some(n) = concurrency {
        config.workflow.max_concurrency = n;
    }
    if no_cache {
        config.cache.enabled = false;
    }

    let mut scheduler = DependencyScheduler::from_config(&config, Some(Arc::clone(&state.cache)));
    let plan = scheduler.plan(&tasks)?;

    let bar = if json || quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(tasks.len() as u64)
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(80));
    scheduler.subscribe(Arc::new(progress_observer(bar.clone())));

    // Ctrl+C stops dispatching; running commands are killed with their attempt.
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling workflow");
                cancel.cancel();
            }
        })
    };

    let housekeeping_token = CancellationToken::new();
    let housekeeping = config.cache.enabled.then(|| {
        state
            .cache
            .spawn_housekeeping(config.cache.housekeeping_interval(), housekeeping_token.clone())
    });

    let outcome = scheduler
        .run_with_cancel(&tasks, file.variables.clone(), cancel)
        .await;

    interrupt.abort();
    housekeeping_token.cancel();
    if let Some(handle) = housekeeping {
        let _ = handle.await;
    }
    bar.finish_and_clear();

    let run = outcome?;
    let ordered: Vec<&TaskResult> = plan
        .batches
        .iter()
        .flatten()
        .filter_map(|id| run.result(id))
        .collect();

    if json {
        let out = serde_json::json!({
            "summary": run.summary,
            "results": ordered,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !quiet {
        print_results(&ordered);
        print_summary(&run);
    }

    Ok(run.is_success())
}

/// Progress observer driving `bar` from workflow snapshots.
fn progress_observer(bar: ProgressBar) -> impl Fn(&WorkflowProgress) -> Result<()> + Send + Sync {
    move |progress: &WorkflowProgress| {
        bar.set_length(progress.total_tasks as u64);
        bar.set_position(progress.finished_tasks() as u64);
        bar.set_message(running_message(progress));
        Ok(())
    }
}

fn running_message(progress: &WorkflowProgress) -> String {
    if progress.currently_running.is_empty() {
        return String::new();
    }
    let names: Vec<&str> = progress
        .currently_running
        .iter()
        .map(String::as_str)
        .collect();
    format!("running {}", names.join(", "))
}

fn print_results(results: &[&TaskResult]) {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Task").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Attempts").fg(Color::White),
        Cell::new("Duration").fg(Color::White),
        Cell::new("Detail").fg(Color::White),
    ]);

    for result in results {
        let (label, color) = status_label(result);
        table.add_row(vec![
            Cell::new(&result.task_id).fg(Color::Cyan),
            Cell::new(label).fg(color),
            Cell::new(result.attempts),
            Cell::new(format!("{:.2}s", result.duration.as_secs_f64())),
            Cell::new(detail(result)),
        ]);
    }

    println!();
    println!("{table}");
}

fn print_summary(run: &WorkflowRun) {
    let summary = &run.summary;
    let headline = if run.is_success() {
        style("Workflow succeeded").green().bold()
    } else {
        style("Workflow failed").red().bold()
    };

    println!();
    println!(
        "  {headline}: {} ok, {} failed, {} skipped, {} from cache in {:.2}s ({} batches)",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.cache_hits,
        summary.duration.as_secs_f64(),
        summary.batches,
    );
    println!("  {}", style(format!("run {}", summary.run_id)).dim());
    println!();
}

fn status_label(result: &TaskResult) -> (&'static str, Color) {
    if result.success && result.from_cache {
        ("cached", Color::Blue)
    } else if result.success {
        ("ok", Color::Green)
    } else if result.skipped {
        ("skipped", Color::Yellow)
    } else {
        ("failed", Color::Red)
    }
}

/// Error message for failures, else the first line of stdout.
fn detail(result: &TaskResult) -> String {
    if let Some(message) = &result.error_message {
        return message.clone();
    }
    let stdout = result
        .value
        .as_ref()
        .and_then(|v| v.get("stdout"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let first = stdout.lines().next().unwrap_or_default();
    if first.chars().count() > 60 {
        let truncated: String = first.chars().take(57).collect();
        format!("{truncated}...")
    } else {
        first.to_string()
    }
}
