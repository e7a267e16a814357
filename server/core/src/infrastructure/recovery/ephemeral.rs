// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory recovery store.
//!
//! Keeps the current client set for inspection only. Nothing survives a
//! restart, so no client ever has state to reclaim and the server never
//! waits in a grace period.

use crate::domain::recovery::{RecoveryRecord, RecoveryStore, RecoveryStoreError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct EphemeralRecoveryStore {
    clients: Mutex<HashMap<Vec<u8>, DateTime<Utc>>>,
    closed: AtomicBool,
}

impl EphemeralRecoveryStore {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), RecoveryStoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RecoveryStoreError::Closed);
        }
        Ok(())
    }
}

impl Default for EphemeralRecoveryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryStore for EphemeralRecoveryStore {
    fn add_client(&self, owner: &[u8]) -> Result<(), RecoveryStoreError> {
        self.ensure_open()?;
        self.clients
            .lock()
            .entry(owner.to_vec())
            .or_insert_with(Utc::now);
        Ok(())
    }

    fn remove_client(&self, owner: &[u8]) -> Result<(), RecoveryStoreError> {
        self.ensure_open()?;
        self.clients.lock().remove(owner);
        Ok(())
    }

    fn reclaim_client(&self, _owner: &[u8]) -> Result<(), RecoveryStoreError> {
        self.ensure_open()
    }

    fn want_reclaim(&self, _owner: &[u8]) -> Result<bool, RecoveryStoreError> {
        self.ensure_open()?;
        Ok(false)
    }

    fn waiting_for_reclaim(&self) -> Result<bool, RecoveryStoreError> {
        self.ensure_open()?;
        Ok(false)
    }

    fn reclaim_complete(&self) -> Result<(), RecoveryStoreError> {
        self.ensure_open()
    }

    fn records(&self) -> Result<Vec<RecoveryRecord>, RecoveryStoreError> {
        self.ensure_open()?;
        Ok(self
            .clients
            .lock()
            .iter()
            .map(|(owner, first_seen)| RecoveryRecord {
                owner: owner.clone(),
                first_seen: *first_seen,
                recovering: false,
            })
            .collect())
    }

    fn close(&self) -> Result<(), RecoveryStoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_waits_for_reclaim() {
        let store = EphemeralRecoveryStore::new();
        store.add_client(b"client-a").unwrap();
        assert!(!store.want_reclaim(b"client-a").unwrap());
        assert!(!store.waiting_for_reclaim().unwrap());
        assert_eq!(store.records().unwrap().len(), 1);

        store.remove_client(b"client-a").unwrap();
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn test_closed_store_rejects_calls() {
        let store = EphemeralRecoveryStore::new();
        store.close().unwrap();
        assert!(matches!(
            store.add_client(b"client-a"),
            Err(RecoveryStoreError::Closed)
        ));
    }
}
