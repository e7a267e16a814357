// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use nfs4d_core::domain::config::RecoveryConfig;
use nfs4d_core::StateConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

pub fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, yaml: bool) -> Result<()> {
    let config = StateConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. NFS4D_CONFIG_PATH: {}",
            std::env::var("NFS4D_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./nfs4d.yaml");
        println!("  4. ~/.nfs4d/config.yaml");
        println!("  5. /etc/nfs4d/config.yaml");
        println!();
    }

    if yaml {
        print!("{}", config.to_yaml_string()?);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Leases:".bold());
    println!("  Lease time: {}", humanize(config.lease_time));
    println!("  Grace period: {}", humanize(config.grace_period()));
    println!("  Sweep interval: {}", humanize(config.sweep_interval()));
    println!();

    println!("{}", "Sessions:".bold());
    println!("  Max slots: {}", config.max_slots);
    println!("  Max operations: {}", config.max_operations);
    println!("  Max callback operations: {}", config.max_cb_operations);
    println!();

    println!("{}", "Registry:".bold());
    println!("  Instance ID: {}", config.instance_id);
    println!("  Worker threads: {} ({} lock stripes)", config.worker_threads, config.lock_stripes());
    match &config.recovery {
        RecoveryConfig::Ephemeral => println!("  Recovery: {}", "ephemeral (no grace period)".dimmed()),
        RecoveryConfig::Sled { path } => println!("  Recovery: sled at {}", path.display()),
    }
    println!("  Log level: {}", config.log_level);
    println!();

    Ok(())
}

fn humanize(duration: std::time::Duration) -> String {
    format!("{}s", duration.as_secs())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = StateConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}
