// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! File Tracker Application Service
//!
//! Per-file share reservation bookkeeping across all clients.
//!
//! Every open of a file is an [`OpenRecord`] keyed by (client, open owner).
//! Operations on one file are serialized by a stripe of a [`StripedLock`];
//! operations on files hashing to different stripes run in parallel. The
//! tracker is consulted by OPEN, OPEN_DOWNGRADE, CLOSE and by the byte-range
//! lock service, and is independent of the client registry.
//!
//! ## Invariant
//!
//! For any two records on the same file whose clients hold a valid lease,
//! `access(A) & deny(B) == 0` and `deny(A) & access(B) == 0`.

use crate::domain::client::NfsClient;
use crate::domain::errors::NfsError;
use crate::domain::file_store::FileId;
use crate::domain::owner::StateOwner;
use crate::domain::share::{seen_bit, ShareMode};
use crate::domain::state::NfsState;
use crate::domain::stateid::{StateId, StateType};
use crate::infrastructure::striped::StripedLock;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

/// One open of a file by a (client, open owner) pair.
struct OpenRecord {
    client: Arc<NfsClient>,
    owner: Arc<StateOwner>,
    state: Arc<NfsState>,
    mode: ShareMode,
    /// Bit `1 << access` for every access mode ever granted to this open.
    seen_access: u32,
    /// Bit `1 << deny` for every deny mode ever granted to this open.
    seen_deny: u32,
}

impl OpenRecord {
    fn is_open_of(&self, client: &NfsClient, owner: &StateOwner) -> bool {
        self.client.id() == client.id() && *self.owner == *owner
    }

    fn is_state(&self, client: &NfsClient, stateid: &StateId) -> bool {
        self.client.id() == client.id() && self.state.stateid().same_state(stateid)
    }
}

pub struct FileTracker {
    stripes: StripedLock,
    files: DashMap<FileId, Vec<OpenRecord>>,
}

impl FileTracker {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: StripedLock::new(stripes),
            files: DashMap::new(),
        }
    }

    /// Register an open of `file`.
    ///
    /// A repeated open by the same (client, owner) merges into the existing
    /// record and bumps its seqid, so one owner keeps one open state id per
    /// file. Returns a snapshot of the open state id.
    pub fn add_open(
        self: &Arc<Self>,
        client: &Arc<NfsClient>,
        owner: &Arc<StateOwner>,
        file: &FileId,
        share_access: u32,
        share_deny: u32,
    ) -> Result<StateId, NfsError> {
        let mode = ShareMode::new(share_access, share_deny);
        if mode.access == 0 {
            return Err(NfsError::Inval("share access must not be empty".into()));
        }

        let _stripe = self.stripes.lock(file);

        if let Some(opens) = self.files.get(file) {
            for record in opens.iter() {
                if record.is_open_of(client, owner) {
                    continue;
                }

                if record.mode.conflicts_with(&mode) && record.client.is_lease_valid() {
                    metrics::counter!("nfs4d_share_conflicts_total").increment(1);
                    return Err(NfsError::ShareDenied {
                        holder: record.state.stateid(),
                        access: record.mode.access,
                        deny: record.mode.deny,
                    });
                }
            }
        }

        let mut opens = self.files.entry(file.clone()).or_default();

        if let Some(record) = opens.iter_mut().find(|r| r.is_open_of(client, owner)) {
            record.mode.access |= mode.access;
            record.mode.deny |= mode.deny;
            record.seen_access |= seen_bit(mode.access);
            record.seen_deny |= seen_bit(mode.deny);
            let stateid = record.state.bump_seqid();
            debug!(file = %file, state = %stateid, "Open merged into existing open state");
            return Ok(stateid);
        }

        let state = client.create_state(owner.clone(), StateType::Open, None);
        let tracker: Weak<FileTracker> = Arc::downgrade(self);
        let inode = file.clone();
        state.add_dispose_listener(Box::new(move |stateid: &StateId| {
            let Some(tracker) = tracker.upgrade() else {
                return Ok(());
            };
            match tracker.remove_open(&inode, stateid) {
                Err(NfsError::BadStateId(_)) => Ok(()),
                other => other,
            }
        }));

        let stateid = state.stateid();
        opens.push(OpenRecord {
            client: client.clone(),
            owner: owner.clone(),
            state,
            mode,
            seen_access: seen_bit(mode.access),
            seen_deny: seen_bit(mode.deny),
        });

        debug!(file = %file, state = %stateid, access = mode.access, deny = mode.deny, "New open");
        Ok(stateid)
    }

    /// Shrink the share reservation of an open (OPEN_DOWNGRADE).
    ///
    /// The new access and deny modes must be subsets of the current ones and
    /// each must have been granted by an earlier OPEN of this open state.
    pub fn downgrade_open(
        &self,
        client: &NfsClient,
        stateid: &StateId,
        file: &FileId,
        share_access: u32,
        share_deny: u32,
    ) -> Result<StateId, NfsError> {
        let mode = ShareMode::new(share_access, share_deny);

        let _stripe = self.stripes.lock(file);
        let mut opens = self
            .files
            .get_mut(file)
            .ok_or(NfsError::BadStateId(*stateid))?;
        let record = opens
            .iter_mut()
            .find(|r| r.is_state(client, stateid))
            .ok_or(NfsError::BadStateId(*stateid))?;

        if mode.access == 0 {
            return Err(NfsError::Inval("share access must not be empty".into()));
        }

        if !mode.is_subset_of(&record.mode) {
            return Err(NfsError::Inval(format!(
                "downgrade to access {:#x} deny {:#x} is not a subset of access {:#x} deny {:#x}",
                mode.access, mode.deny, record.mode.access, record.mode.deny
            )));
        }

        if record.seen_access & seen_bit(mode.access) == 0 {
            return Err(NfsError::Inval(format!(
                "share access {:#x} was never granted",
                mode.access
            )));
        }

        if record.seen_deny & seen_bit(mode.deny) == 0 {
            return Err(NfsError::Inval(format!(
                "share deny {:#x} was never granted",
                mode.deny
            )));
        }

        record.mode = mode;
        Ok(record.state.bump_seqid())
    }

    /// Forget the open named by `stateid`, dropping the file entry with its
    /// last open.
    pub fn remove_open(&self, file: &FileId, stateid: &StateId) -> Result<(), NfsError> {
        let _stripe = self.stripes.lock(file);

        {
            let mut opens = self
                .files
                .get_mut(file)
                .ok_or(NfsError::BadStateId(*stateid))?;
            let position = opens
                .iter()
                .position(|r| r.state.stateid().same_state(stateid))
                .ok_or(NfsError::BadStateId(*stateid))?;
            opens.remove(position);
        }

        self.files.remove_if(file, |_, opens| opens.is_empty());
        Ok(())
    }

    /// Share access granted to the open `stateid` of `client`.
    pub fn get_share_access(
        &self,
        client: &NfsClient,
        file: &FileId,
        stateid: &StateId,
    ) -> Result<u32, NfsError> {
        self.share_mode(client, file, stateid).map(|mode| mode.access)
    }

    pub fn share_mode(
        &self,
        client: &NfsClient,
        file: &FileId,
        stateid: &StateId,
    ) -> Result<ShareMode, NfsError> {
        let _stripe = self.stripes.lock(file);
        self.files
            .get(file)
            .and_then(|opens| {
                opens
                    .iter()
                    .find(|r| r.is_state(client, stateid))
                    .map(|r| r.mode)
            })
            .ok_or(NfsError::BadStateId(*stateid))
    }

    /// Open state ids currently registered on `file`.
    pub fn open_state_ids(&self, file: &FileId) -> Vec<StateId> {
        let _stripe = self.stripes.lock(file);
        self.files
            .get(file)
            .map(|opens| opens.iter().map(|r| r.state.stateid()).collect())
            .unwrap_or_default()
    }

    pub fn has_opens(&self, file: &FileId) -> bool {
        self.files.contains_key(file)
    }

    /// Number of files with at least one open.
    pub fn open_files(&self) -> usize {
        self.files.len()
    }
}
