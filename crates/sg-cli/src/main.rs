//! SmartGraph CLI - runs the WebSocket bridge to Neo4j
//!
//! Settings come from flags, the environment, or an env file; flags win over
//! the environment and the environment wins over the file.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod env_file;

use config::{BridgeArgs, BridgeConfig};

#[derive(Parser)]
#[command(name = "smartgraph-ws")]
#[command(author = "SmartGraph Contributors")]
#[command(version)]
#[command(about = "WebSocket bridge between browser clients and Neo4j", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Env file to read settings from
    #[arg(long, global = true, default_value = "../.env")]
    env_file: PathBuf,

    #[command(flatten)]
    bridge: BridgeArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for Neo4j and serve WebSocket clients (default)
    Serve,

    /// Check that Neo4j is reachable, then exit
    Check,
}

fn main() {
    let mut cli = Cli::parse();

    // The environment is only written here, before any runtime thread exists.
    let loaded = env_file::load(&cli.env_file);
    if matches!(loaded, Ok(n) if n > 0) {
        // Re-parse so settings from the file are seen as environment.
        cli = Cli::parse();
    }

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    match loaded {
        Ok(0) => {}
        Ok(n) => tracing::debug!("Loaded {} settings from {}", n, cli.env_file.display()),
        Err(e) => tracing::warn!("Could not read {}: {}", cli.env_file.display(), e),
    }

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(async move {
        let config = BridgeConfig::try_from(cli.bridge)?;
        match cli.command.unwrap_or(Commands::Serve) {
            Commands::Serve => commands::serve(config).await,
            Commands::Check => commands::check(config).await,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_from_sync_main_reports_config_errors() {
        let cli = Cli::parse_from([
            "smartgraph-ws",
            "--neo4j-user",
            "neo4j",
            "--neo4j-password",
            "secret",
            "--neo4j-host",
            "graphdb",
            "--pool-size",
            "0",
            "check",
        ]);

        let err = run(cli).unwrap_err();
        assert_eq!(
            err.downcast_ref::<config::ConfigError>(),
            Some(&config::ConfigError::EmptyPool)
        );
    }
}
