//! CLI command definitions for the `tweave` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod cache;
pub mod plan;
pub mod run;
pub mod workflow_file;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use cache::CacheCommand;

/// Run dependency-ordered task workflows with caching.
#[derive(Parser)]
#[command(name = "tweave", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow file and print its batch plan.
    Plan {
        /// Path to the workflow TOML file.
        file: PathBuf,
    },

    /// Run a workflow file.
    Run {
        /// Path to the workflow TOML file.
        file: PathBuf,

        /// Override the configured maximum concurrency.
        #[arg(long, short = 'j')]
        concurrency: Option<usize>,

        /// Neither read nor write the cache for this run.
        #[arg(long)]
        no_cache: bool,
    },

    /// Inspect and maintain the persistent cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
