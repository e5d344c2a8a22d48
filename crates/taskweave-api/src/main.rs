//! Taskweave CLI entry point.
//!
//! Binary name: `tweave`
//!
//! Parses CLI arguments, sets up tracing, loads engine configuration and the
//! cache, then dispatches to the matching command handler.

mod cli;
mod state;

use std::process::ExitCode;

use clap::Parser;
use clap_complete::generate;
use taskweave_observe::{TracingOptions, directive_for_verbosity, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let options = TracingOptions {
        default_directive: directive_for_verbosity(cli.quiet, cli.verbose).to_string(),
        json: cli.json,
        enable_otel: cli.otel,
    };
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "tweave", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let outcome = dispatch(cli).await;
    shutdown_tracing();
    outcome
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Plan { file } => {
            cli::plan::show_plan(&file, cli.json).await?;
        }

        Commands::Run {
            file,
            concurrency,
            no_cache,
        } => {
            let state = AppState::init().await?;
            let succeeded =
                cli::run::run_workflow(&state, &file, concurrency, no_cache, cli.json, cli.quiet)
                    .await?;
            if !succeeded {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Cache { command } => {
            let state = AppState::init().await?;
            cli::cache::handle_cache_command(command, &state, cli.json).await?;
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(ExitCode::SUCCESS)
}
