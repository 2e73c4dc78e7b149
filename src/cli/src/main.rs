//! Jobgate CLI - inspect and repair shared job-engine state.
//!
//! Provides commands for running-job registries, leases, dedup records and
//! configuration.

mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{config, dedup, lease, running};
use context::EngineContext;
use output::OutputFormat;

/// Jobgate - capacity-limited job engine CLI
#[derive(Parser)]
#[command(
    name = "jobgate",
    version = "0.1.0",
    about = "Jobgate - capacity-limited job engine",
    long_about = "CLI tool for inspecting running-job registries, leases and dedup records in the shared store.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Engine configuration file
    #[arg(short, long, global = true, env = "JOBGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log engine activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Running-job registry operations
    #[command(subcommand)]
    Running(running::RunningCommands),

    /// Exclusive lease operations
    #[command(subcommand)]
    Lease(lease::LeaseCommands),

    /// Deduplication record operations
    #[command(subcommand)]
    Dedup(dedup::DedupCommands),

    /// Configuration inspection
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;
    let result = run(cli, format).await;

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli, format: OutputFormat) -> Result<()> {
    let config_path = cli.config.or_else(config::default_config_path);
    let engine_config = context::load_config(config_path.as_deref())?;
    context::init_logging(cli.verbose)?;

    if let Commands::Config(cmd) = cli.command {
        return config::execute(cmd, &engine_config, config_path.as_deref(), format);
    }

    let ctx = EngineContext::connect(engine_config).await?;

    match cli.command {
        Commands::Running(cmd) => running::execute(cmd, &ctx, format).await,
        Commands::Lease(cmd) => lease::execute(cmd, &ctx, format).await,
        Commands::Dedup(cmd) => dedup::execute(cmd, &ctx, format).await,
        Commands::Config(_) => Ok(()),
    }
}
