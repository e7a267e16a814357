// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Client Recovery Store
//!
//! Durable record of client owner tokens, consulted during the grace period
//! that follows a server restart.
//!
//! ## Model
//!
//! Two tables:
//!
//! | Table | Content |
//! |-------|---------|
//! | current | clients known to this server instance |
//! | recovering | clients known to the previous instance that have not reclaimed yet |
//!
//! On open, whatever is left in *current* (the previous instance's clients)
//! is merged into *recovering*. The grace window stays open while
//! *recovering* holds entries older than this process' start; it closes when
//! the last one reclaims or when [`RecoveryStore::reclaim_complete`] is called.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Recovery store errors
#[derive(Debug, Error)]
pub enum RecoveryStoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupted record for client owner {owner}: {reason}")]
    Corrupted { owner: String, reason: String },

    #[error("Recovery store is closed")]
    Closed,
}

/// One durable client record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryRecord {
    pub owner: Vec<u8>,
    pub first_seen: DateTime<Utc>,
    /// Whether the record belongs to the previous server instance.
    pub recovering: bool,
}

/// Durable store of client identities. All methods must be safe to call
/// concurrently; `add_client` and `remove_client` must survive restarts.
pub trait RecoveryStore: Send + Sync {
    /// Record `owner` as a client of this server instance.
    fn add_client(&self, owner: &[u8]) -> Result<(), RecoveryStoreError>;

    /// Forget `owner` (client expired or destroyed).
    fn remove_client(&self, owner: &[u8]) -> Result<(), RecoveryStoreError>;

    /// Mark that `owner` finished reclaiming. Completes the grace window once
    /// no client is left to reclaim.
    fn reclaim_client(&self, owner: &[u8]) -> Result<(), RecoveryStoreError>;

    /// Whether `owner` held state before this server instance started.
    fn want_reclaim(&self, owner: &[u8]) -> Result<bool, RecoveryStoreError>;

    /// Whether any previous client is still expected to reclaim.
    fn waiting_for_reclaim(&self) -> Result<bool, RecoveryStoreError>;

    /// End the grace window: drop every remaining recovering record.
    fn reclaim_complete(&self) -> Result<(), RecoveryStoreError>;

    /// All records, current and recovering.
    fn records(&self) -> Result<Vec<RecoveryRecord>, RecoveryStoreError>;

    fn close(&self) -> Result<(), RecoveryStoreError>;
}
