// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! sled-backed recovery store.
//!
//! Two trees keyed by client owner bytes, each value the big-endian
//! millisecond timestamp of when the client was first recorded:
//!
//! - `current`: clients of this server instance
//! - `recovering`: clients of the previous instance still expected to reclaim
//!
//! Opening the database moves every `current` record into `recovering`.

use crate::domain::recovery::{RecoveryRecord, RecoveryStore, RecoveryStoreError};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

const CURRENT_TREE: &str = "current";
const RECOVERING_TREE: &str = "recovering";

fn db_error(e: sled::Error) -> RecoveryStoreError {
    RecoveryStoreError::Database(e.to_string())
}

fn encode_timestamp(ts: DateTime<Utc>) -> [u8; 8] {
    ts.timestamp_millis().to_be_bytes()
}

fn decode_timestamp(owner: &[u8], value: &[u8]) -> Result<DateTime<Utc>, RecoveryStoreError> {
    let corrupted = |reason: &str| RecoveryStoreError::Corrupted {
        owner: String::from_utf8_lossy(owner).into_owned(),
        reason: reason.to_string(),
    };

    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| corrupted("timestamp is not 8 bytes"))?;
    DateTime::from_timestamp_millis(i64::from_be_bytes(bytes))
        .ok_or_else(|| corrupted("timestamp out of range"))
}

pub struct SledRecoveryStore {
    db: sled::Db,
    current: sled::Tree,
    recovering: sled::Tree,
    closed: AtomicBool,
}

impl SledRecoveryStore {
    /// Open (or create) the database at `path` and stage the previous
    /// instance's clients for reclaim.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecoveryStoreError> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(db_error)?;
        let current = db.open_tree(CURRENT_TREE).map_err(db_error)?;
        let recovering = db.open_tree(RECOVERING_TREE).map_err(db_error)?;

        let mut staged = 0usize;
        for entry in current.iter() {
            let (owner, value) = entry.map_err(db_error)?;
            recovering.insert(owner, value).map_err(db_error)?;
            staged += 1;
        }
        current.clear().map_err(db_error)?;
        db.flush().map_err(db_error)?;

        info!(
            path = %path.display(),
            staged,
            recovering = recovering.len(),
            "Opened client recovery database"
        );

        Ok(Self {
            db,
            current,
            recovering,
            closed: AtomicBool::new(false),
        })
    }

    /// Read every record at `path` without staging anything for reclaim.
    /// Used for offline inspection while no server runs on the database.
    pub fn inspect(path: impl AsRef<Path>) -> Result<Vec<RecoveryRecord>, RecoveryStoreError> {
        let db = sled::open(path.as_ref()).map_err(db_error)?;
        let mut records = Self::collect(&db.open_tree(CURRENT_TREE).map_err(db_error)?, false)?;
        records.extend(Self::collect(
            &db.open_tree(RECOVERING_TREE).map_err(db_error)?,
            true,
        )?);
        Ok(records)
    }

    /// Drop every record at `path`. Returns the number of records removed.
    pub fn purge(path: impl AsRef<Path>) -> Result<usize, RecoveryStoreError> {
        let db = sled::open(path.as_ref()).map_err(db_error)?;
        let mut removed = 0;
        for name in [CURRENT_TREE, RECOVERING_TREE] {
            let tree = db.open_tree(name).map_err(db_error)?;
            removed += tree.len();
            tree.clear().map_err(db_error)?;
        }
        db.flush().map_err(db_error)?;
        Ok(removed)
    }

    fn ensure_open(&self) -> Result<(), RecoveryStoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RecoveryStoreError::Closed);
        }
        Ok(())
    }

    fn collect(tree: &sled::Tree, recovering: bool) -> Result<Vec<RecoveryRecord>, RecoveryStoreError> {
        tree.iter()
            .map(|entry| {
                let (owner, value) = entry.map_err(db_error)?;
                Ok(RecoveryRecord {
                    first_seen: decode_timestamp(&owner, &value)?,
                    owner: owner.to_vec(),
                    recovering,
                })
            })
            .collect()
    }
}

impl RecoveryStore for SledRecoveryStore {
    fn add_client(&self, owner: &[u8]) -> Result<(), RecoveryStoreError> {
        self.ensure_open()?;
        // keep the first-seen time of a client that re-registers
        let _ = self
            .current
            .compare_and_swap(owner, None as Option<&[u8]>, Some(&encode_timestamp(Utc::now())[..]))
            .map_err(db_error)?;
        self.current.flush().map_err(db_error)?;
        Ok(())
    }

    fn remove_client(&self, owner: &[u8]) -> Result<(), RecoveryStoreError> {
        self.ensure_open()?;
        self.current.remove(owner).map_err(db_error)?;
        self.current.flush().map_err(db_error)?;
        Ok(())
    }

    fn reclaim_client(&self, owner: &[u8]) -> Result<(), RecoveryStoreError> {
        self.ensure_open()?;
        if self.recovering.remove(owner).map_err(db_error)?.is_some() {
            debug!(remaining = self.recovering.len(), "Client reclaimed");
        }
        self.recovering.flush().map_err(db_error)?;
        Ok(())
    }

    fn want_reclaim(&self, owner: &[u8]) -> Result<bool, RecoveryStoreError> {
        self.ensure_open()?;
        self.recovering.contains_key(owner).map_err(db_error)
    }

    fn waiting_for_reclaim(&self) -> Result<bool, RecoveryStoreError> {
        self.ensure_open()?;
        Ok(!self.recovering.is_empty())
    }

    fn reclaim_complete(&self) -> Result<(), RecoveryStoreError> {
        self.ensure_open()?;
        let dropped = self.recovering.len();
        self.recovering.clear().map_err(db_error)?;
        self.recovering.flush().map_err(db_error)?;
        if dropped > 0 {
            info!(dropped, "Grace period over, dropped unreclaimed clients");
        }
        Ok(())
    }

    fn records(&self) -> Result<Vec<RecoveryRecord>, RecoveryStoreError> {
        self.ensure_open()?;
        let mut records = Self::collect(&self.current, false)?;
        records.extend(Self::collect(&self.recovering, true)?);
        Ok(records)
    }

    fn close(&self) -> Result<(), RecoveryStoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.db.flush().map_err(db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_stages_clients_for_reclaim() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = SledRecoveryStore::open(dir.path()).unwrap();
            assert!(!store.waiting_for_reclaim().unwrap());
            store.add_client(b"client-a").unwrap();
            store.add_client(b"client-b").unwrap();
            store.add_client(b"client-c").unwrap();
            store.remove_client(b"client-c").unwrap();
            store.close().unwrap();
        }

        let store = SledRecoveryStore::open(dir.path()).unwrap();
        assert!(store.waiting_for_reclaim().unwrap());
        assert!(store.want_reclaim(b"client-a").unwrap());
        assert!(!store.want_reclaim(b"client-c").unwrap());

        store.add_client(b"client-a").unwrap();
        store.reclaim_client(b"client-a").unwrap();
        assert!(store.waiting_for_reclaim().unwrap());

        store.reclaim_client(b"client-b").unwrap();
        assert!(!store.waiting_for_reclaim().unwrap());

        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].owner, b"client-a".to_vec());
        assert!(!records[0].recovering);
    }

    #[test]
    fn test_reclaim_complete_drops_recovering() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledRecoveryStore::open(dir.path()).unwrap();
            store.add_client(b"client-a").unwrap();
            store.close().unwrap();
        }

        let store = SledRecoveryStore::open(dir.path()).unwrap();
        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].recovering);

        store.reclaim_complete().unwrap();
        assert!(!store.waiting_for_reclaim().unwrap());
        assert!(!store.want_reclaim(b"client-a").unwrap());
    }

    #[test]
    fn test_inspect_and_purge_leave_staging_alone() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledRecoveryStore::open(dir.path()).unwrap();
            store.add_client(b"client-a").unwrap();
            store.close().unwrap();
        }

        let records = SledRecoveryStore::inspect(dir.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].recovering);

        assert_eq!(SledRecoveryStore::purge(dir.path()).unwrap(), 1);
        let store = SledRecoveryStore::open(dir.path()).unwrap();
        assert!(!store.waiting_for_reclaim().unwrap());
    }

    #[test]
    fn test_closed_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledRecoveryStore::open(dir.path()).unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.records(), Err(RecoveryStoreError::Closed)));
    }

    #[test]
    fn test_corrupted_timestamp() {
        assert!(matches!(
            decode_timestamp(b"client-a", &[1, 2, 3]),
            Err(RecoveryStoreError::Corrupted { .. })
        ));
    }
}
