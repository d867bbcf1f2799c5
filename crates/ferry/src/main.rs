//! Ferry - replicate catalog environments and parameter bindings between SQL Servers
//!
//! Main entry point for the ferry CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{check, config, export, overrides, sync};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Ferry - replicate catalog environments and parameter bindings between SQL Servers
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file to use instead of discovery
    #[arg(long, global = true, env = "FERRY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replicate environments, references and parameter bindings
    Sync(sync::SyncArgs),

    /// Check folders and projects on both servers without writing
    Check(check::CheckArgs),

    /// Copy literal parameter overrides of one project
    Overrides(overrides::OverridesArgs),

    /// Export deployed projects to .ispac files
    Export(export::ExportArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "ferry=debug,ferry_sync=debug,ferry_catalog=debug,ferry_config=debug,warn"
    } else {
        "ferry=info,ferry_sync=info,ferry_catalog=info,ferry_config=info,warn"
    };

    let log_dir = ferry_config::log_dir().unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ferry.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(cli.verbose)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "ferry=debug,ferry_sync=debug,ferry_catalog=debug,ferry_config=debug,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        config_path: cli.config,
    };

    match cli.command {
        Commands::Sync(args) => sync::run(args, &ctx).await,
        Commands::Check(args) => check::run(args, &ctx).await,
        Commands::Overrides(args) => overrides::run(args, &ctx).await,
        Commands::Export(args) => export::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
