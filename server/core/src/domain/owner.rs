// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Open and lock owners.

use crate::domain::errors::NfsError;
use crate::domain::stateid::ClientId;
use parking_lot::Mutex;

/// A client-supplied open or lock owner.
///
/// Equality is defined by the opaque owner bytes only. The sequence id is
/// only meaningful for NFSv4.0, where every state-mutating request carries
/// the next owner seqid; session based clients get exactly-once semantics
/// from their slots instead.
#[derive(Debug)]
pub struct StateOwner {
    client_id: ClientId,
    owner: Vec<u8>,
    session_based: bool,
    seqid: Mutex<u32>,
}

impl StateOwner {
    pub fn new(client_id: ClientId, owner: Vec<u8>, seqid: u32, session_based: bool) -> Self {
        Self {
            client_id,
            owner,
            session_based,
            seqid: Mutex::new(seqid),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn owner(&self) -> &[u8] {
        &self.owner
    }

    pub fn seqid(&self) -> u32 {
        *self.seqid.lock()
    }

    /// Accept `seqid` if it is the successor of the last one seen.
    pub fn accept_as_next_seqid(&self, seqid: u32) -> Result<(), NfsError> {
        if self.session_based {
            return Ok(());
        }

        let mut current = self.seqid.lock();
        let expected = current.wrapping_add(1);
        if seqid != expected {
            return Err(NfsError::BadSeqid {
                expected,
                given: seqid,
            });
        }
        *current = seqid;
        Ok(())
    }
}

impl PartialEq for StateOwner {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner
    }
}

impl Eq for StateOwner {}

impl std::hash::Hash for StateOwner {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
    }
}
