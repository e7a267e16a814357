// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `nfs4d run`: start the client registry and keep it alive until Ctrl-C.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use nfs4d_core::infrastructure::recovery::open_recovery_store;
use nfs4d_core::{ClientRegistry, StateConfig};

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = StateConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    let recovery = open_recovery_store(&config.recovery).context("Failed to open recovery store")?;
    let registry = ClientRegistry::launch(config, recovery);

    info!(
        instance_id = registry.instance_id(),
        lease_time = ?registry.lease_time(),
        grace = registry.is_grace_period().unwrap_or(false),
        "nfs4d state core running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    registry.shutdown().context("Failed to shut down client registry")?;
    info!("nfs4d stopped");
    Ok(())
}
