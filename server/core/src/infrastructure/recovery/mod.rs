// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Recovery store backends.

pub mod ephemeral;
pub mod sled_store;

pub use ephemeral::EphemeralRecoveryStore;
pub use sled_store::SledRecoveryStore;

use crate::domain::config::RecoveryConfig;
use crate::domain::recovery::{RecoveryStore, RecoveryStoreError};
use std::sync::Arc;

/// Open the recovery store selected by configuration.
pub fn open_recovery_store(
    config: &RecoveryConfig,
) -> Result<Arc<dyn RecoveryStore>, RecoveryStoreError> {
    match config {
        RecoveryConfig::Ephemeral => Ok(Arc::new(EphemeralRecoveryStore::new())),
        RecoveryConfig::Sled { path } => Ok(Arc::new(SledRecoveryStore::open(path)?)),
    }
}
