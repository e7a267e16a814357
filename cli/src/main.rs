// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # nfs4d
//!
//! Runs the NFSv4 client/session/state core and inspects its durable
//! recovery records.
//!
//! ## Commands
//!
//! - `nfs4d run` - Start the state core and wait for Ctrl-C
//! - `nfs4d recovery list|purge` - Inspect or clear the recovery database
//! - `nfs4d config show|validate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nfs4d_core::StateConfig;
use std::path::PathBuf;

mod commands;

use commands::{ConfigCommand, RecoveryCommand};

/// nfs4d - NFSv4 client, session and state core
#[derive(Parser)]
#[command(name = "nfs4d")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "NFS4D_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the
    /// configured level
    #[arg(long, global = true, env = "NFS4D_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the state core
    #[command(name = "run")]
    Run,

    /// Recovery database inspection
    #[command(name = "recovery")]
    Recovery {
        #[command(subcommand)]
        command: RecoveryCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // the subscriber is not installed yet, so config discovery logs nothing here
    let level = match cli.log_level.clone() {
        Some(level) => level,
        None => StateConfig::load_or_default(cli.config.clone())
            .map(|config| config.log_level)
            .unwrap_or_else(|_| "info".to_string()),
    };
    init_logging(&level)?;

    match cli.command {
        Commands::Run => commands::run::execute(cli.config).await,
        Commands::Recovery { command } => commands::recovery::handle_command(command),
        Commands::Config { command } => commands::config::handle_command(command, cli.config),
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
