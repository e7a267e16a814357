// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Recovery database commands
//!
//! Commands: list, purge. Both operate on a database no server is using.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use nfs4d_core::infrastructure::recovery::SledRecoveryStore;

#[derive(Subcommand)]
pub enum RecoveryCommand {
    /// List client records
    List {
        /// Recovery database directory
        #[arg(long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Drop every client record. Restarted servers skip the grace period.
    Purge {
        /// Recovery database directory
        #[arg(long, value_name = "DIR")]
        path: PathBuf,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

pub fn handle_command(command: RecoveryCommand) -> Result<()> {
    match command {
        RecoveryCommand::List { path } => list(path),
        RecoveryCommand::Purge { path, yes } => purge(path, yes),
    }
}

/// Render an owner token as text when printable, hex otherwise.
fn display_owner(owner: &[u8]) -> String {
    match std::str::from_utf8(owner) {
        Ok(text) if text.chars().all(|c| !c.is_control()) => text.to_string(),
        _ => owner.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}

fn list(path: PathBuf) -> Result<()> {
    let mut records = SledRecoveryStore::inspect(&path)
        .with_context(|| format!("Failed to read recovery database at {:?}", path))?;
    records.sort_by_key(|r| r.first_seen);

    if records.is_empty() {
        println!("{}", "No client records".dimmed());
        return Ok(());
    }

    println!("{}", "Client records:".bold());
    for record in &records {
        let table = if record.recovering {
            "recovering".yellow()
        } else {
            "current".green()
        };
        println!(
            "  {:<11} {}  {}",
            table,
            record.first_seen.format("%Y-%m-%d %H:%M:%S UTC"),
            display_owner(&record.owner)
        );
    }
    println!();
    println!("{} record(s)", records.len());
    Ok(())
}

fn purge(path: PathBuf, yes: bool) -> Result<()> {
    if !yes {
        println!(
            "{}",
            "Refusing to purge without --yes; clients of the last server instance lose their reclaim window."
                .yellow()
        );
        return Ok(());
    }

    let removed = SledRecoveryStore::purge(&path)
        .with_context(|| format!("Failed to purge recovery database at {:?}", path))?;
    println!("{}", format!("✓ Removed {} record(s)", removed).green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_owner() {
        assert_eq!(display_owner(b"linux-client.example.org"), "linux-client.example.org");
        assert_eq!(display_owner(&[0x00, 0xff]), "00ff");
    }
}
