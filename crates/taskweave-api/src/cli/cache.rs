//! Cache CLI subcommands: inspect and maintain the persistent cache tier.

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use taskweave_types::error::CacheError;

use crate::state::AppState;

/// Cache subcommands.
#[derive(Subcommand)]
pub enum CacheCommand {
    /// Show persistent tier usage and cache settings.
    Stats,

    /// List entries stored on disk.
    #[command(alias = "ls")]
    List {
        /// Only show entries carrying this tag.
        #[arg(long)]
        tag: Option<String>,
    },

    /// Print the cached value for a key.
    Get {
        /// Cache key.
        key: String,
    },

    /// Delete one entry.
    #[command(alias = "rm")]
    Delete {
        /// Cache key.
        key: String,
    },

    /// Remove entries by tag, or everything when no tag is given.
    Clear {
        /// Tag to invalidate (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Skip confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Shrink the persistent tier to 80% of its size budget if it is over.
    Prune,
}

/// Handle a cache subcommand.
pub async fn handle_cache_command(cmd: CacheCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        CacheCommand::Stats => cache_stats(state, json).await,
        CacheCommand::List { tag } => cache_list(state, tag.as_deref(), json).await,
        CacheCommand::Get { key } => cache_get(state, &key, json).await,
        CacheCommand::Delete { key } => cache_delete(state, &key, json).await,
        CacheCommand::Clear { tags, force } => cache_clear(state, &tags, force, json).await,
        CacheCommand::Prune => cache_prune(state, json).await,
    }
}

fn require_persistent(state: &AppState) -> Result<(), CacheError> {
    if state.cache.has_persistent_tier() {
        Ok(())
    } else {
        Err(CacheError::Disabled)
    }
}

async fn cache_stats(state: &AppState, json: bool) -> Result<()> {
    let usage = state.cache.persistent_usage().await;
    let config = &state.config.cache;

    if json {
        let out = serde_json::json!({
            "data_dir": state.data_dir,
            "cache_dir": state.cache_dir,
            "enabled": config.enabled,
            "persistent": usage.is_some(),
            "entries": usage.as_ref().map(|u| u.entries),
            "total_bytes": usage.as_ref().map(|u| u.total_bytes),
            "max_bytes": config.persistent_max_bytes,
            "default_ttl_secs": config.default_ttl_secs,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {}", style("Cache").bold());
    println!();
    println!("  Data dir:      {}", style(state.data_dir.display()).cyan());
    println!("  Cache dir:     {}", style(state.cache_dir.display()).cyan());
    println!(
        "  Enabled:       {}",
        if config.enabled { style("yes").green() } else { style("no").yellow() }
    );
    match usage {
        Some(usage) => {
            let percent = if config.persistent_max_bytes == 0 {
                0.0
            } else {
                usage.total_bytes as f64 * 100.0 / config.persistent_max_bytes as f64
            };
            println!("  Entries:       {}", usage.entries);
            println!(
                "  Size:          {} / {} ({percent:.1}%)",
                format_bytes(usage.total_bytes),
                format_bytes(config.persistent_max_bytes),
            );
        }
        None => println!("  Persistent:    {}", style("off").yellow()),
    }
    println!("  Default TTL:   {}s", config.default_ttl_secs);
    println!();

    Ok(())
}

async fn cache_list(state: &AppState, tag: Option<&str>, json: bool) -> Result<()> {
    require_persistent(state)?;

    let mut entries = state.file_store().entries().await?;
    if let Some(tag) = tag {
        entries.retain(|e| e.tags.contains(tag));
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));

    if json {
        let out: Vec<_> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "key": e.key,
                    "tags": e.tags,
                    "stored_at": e.stored_at,
                    "expires_at": e.expires_at(),
                    "size": e.approximate_size,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!("  No cache entries.");
        println!();
        return Ok(());
    }

    let now = Utc::now();
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Key").fg(Color::White),
        Cell::new("Tags").fg(Color::White),
        Cell::new("Stored").fg(Color::White),
        Cell::new("Expires").fg(Color::White),
        Cell::new("Size").fg(Color::White),
    ]);

    for entry in &entries {
        let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
        let expires = if entry.is_valid_at(now) {
            Cell::new(entry.expires_at().format("%Y-%m-%d %H:%M:%S"))
        } else {
            Cell::new("expired").fg(Color::Yellow)
        };
        table.add_row(vec![
            Cell::new(&entry.key).fg(Color::Cyan),
            Cell::new(tags.join(", ")),
            Cell::new(entry.stored_at.format("%Y-%m-%d %H:%M:%S")),
            expires,
            Cell::new(format_bytes(entry.approximate_size)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!("  {} entries", entries.len());
    println!();

    Ok(())
}

async fn cache_get(state: &AppState, key: &str, json: bool) -> Result<()> {
    let value = state.cache.get(key).await;

    if json {
        let out = serde_json::json!({ "key": key, "value": value });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    match value {
        Some(val) => println!(
            "  {} = {}",
            style(key).cyan().bold(),
            serde_json::to_string_pretty(&val)?
        ),
        None => println!("  Key '{}' not found or expired.", style(key).yellow()),
    }
    println!();

    Ok(())
}

async fn cache_delete(state: &AppState, key: &str, json: bool) -> Result<()> {
    state.cache.delete(key).await;

    if json {
        println!("{}", serde_json::json!({ "deleted": true, "key": key }));
    } else {
        println!();
        println!("  {} Deleted '{}'", style("ok").green(), style(key).cyan());
        println!();
    }

    Ok(())
}

async fn cache_clear(state: &AppState, tags: &[String], force: bool, json: bool) -> Result<()> {
    if !tags.is_empty() {
        let removed = state.cache.clear_by_tags(tags).await;
        if json {
            println!("{}", serde_json::json!({ "removed": removed, "tags": tags }));
        } else {
            println!();
            println!(
                "  {} Removed {} entries tagged {}",
                style("ok").green(),
                removed,
                style(tags.join(", ")).cyan()
            );
            println!();
        }
        return Ok(());
    }

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove {} cache entries?", style("all").red().bold()))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let before = state
        .cache
        .persistent_usage()
        .await
        .map_or(0, |usage| usage.entries);
    state.cache.clear().await;

    if json {
        println!("{}", serde_json::json!({ "removed": before }));
    } else {
        println!();
        println!("  {} Cache cleared ({before} entries on disk)", style("ok").green());
        println!();
    }

    Ok(())
}

async fn cache_prune(state: &AppState, json: bool) -> Result<()> {
    require_persistent(state)?;

    let Some(report) = state.cache.prune_persistent().await else {
        anyhow::bail!("Pruning {} failed; see the log for details", state.cache_dir.display());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!(
            "  {} Removed {} entries: {} -> {}",
            style("ok").green(),
            report.removed_entries,
            format_bytes(report.bytes_before),
            format_bytes(report.bytes_after),
        );
        println!();
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
