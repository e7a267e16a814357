// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! State Identifiers
//!
//! Encoding of the opaque identifiers handed out to clients.
//!
//! ```text
//! client id   (8 bytes)   boot seconds (32) | instance id (8) | counter (24)
//! state id   (12 bytes)   client id (0..8) | per-client counter (8..11) | type tag (11)
//! session id (16 bytes)   client id (0..8) | zero (8..12) | per-client counter (12..16)
//! ```
//!
//! Ids carry the client id so that every lookup can be routed to the owning
//! client record without a global index. All generators are atomics, so any
//! number of request threads may allocate ids concurrently.

use crate::domain::errors::NfsError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Size of the opaque part of a state id.
pub const STATEID_OTHER_SIZE: usize = 12;

/// Size of a session id.
pub const SESSIONID_SIZE: usize = 16;

const COUNTER_MASK: u32 = 0x00ff_ffff;

/// Server-issued client identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl ClientId {
    pub fn from_parts(boot_secs: u32, instance_id: u8, counter: u32) -> Self {
        Self(
            (u64::from(boot_secs) << 32)
                | (u64::from(instance_id) << 24)
                | u64::from(counter & COUNTER_MASK),
        )
    }

    /// Wall-clock second of the server start that issued this id.
    pub fn boot_secs(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn instance_id(&self) -> u8 {
        ((self.0 >> 24) & 0xff) as u8
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Generates client ids for one registry instance.
#[derive(Debug)]
pub struct ClientIdGenerator {
    boot_secs: u32,
    instance_id: u8,
    counter: AtomicU32,
}

impl ClientIdGenerator {
    pub fn new(boot_secs: u32, instance_id: u8) -> Self {
        Self {
            boot_secs,
            instance_id,
            counter: AtomicU32::new(0),
        }
    }

    pub fn next(&self) -> ClientId {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        ClientId::from_parts(self.boot_secs, self.instance_id, counter)
    }

    pub fn boot_secs(&self) -> u32 {
        self.boot_secs
    }

    pub fn instance_id(&self) -> u8 {
        self.instance_id
    }

    /// Whether `id` was issued by this generator's server instance.
    pub fn issued(&self, id: ClientId) -> bool {
        id.boot_secs() == self.boot_secs && id.instance_id() == self.instance_id
    }
}

/// Kind of state a state id names. Stored in byte 11 of the state id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StateType {
    Open = 1,
    Lock = 2,
    Layout = 3,
    Delegation = 4,
    ServerSideCopy = 5,
}

impl StateType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Open),
            2 => Some(Self::Lock),
            3 => Some(Self::Layout),
            4 => Some(Self::Delegation),
            5 => Some(Self::ServerSideCopy),
            _ => None,
        }
    }
}

/// NFSv4 `stateid4`: twelve opaque bytes plus a sequence id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId {
    pub seqid: u32,
    pub other: [u8; STATEID_OTHER_SIZE],
}

impl StateId {
    pub fn new(client_id: ClientId, counter: u32, state_type: StateType) -> Self {
        let mut other = [0u8; STATEID_OTHER_SIZE];
        other[..8].copy_from_slice(&client_id.to_bytes());
        let counter = (counter & COUNTER_MASK).to_be_bytes();
        other[8..11].copy_from_slice(&counter[1..]);
        other[11] = state_type as u8;
        Self { seqid: 0, other }
    }

    pub fn client_id(&self) -> ClientId {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.other[..8]);
        ClientId(u64::from_be_bytes(id))
    }

    pub fn state_type(&self) -> Option<StateType> {
        StateType::from_tag(self.other[11])
    }

    /// Same state regardless of sequence id.
    pub fn same_state(&self, other: &StateId) -> bool {
        self.other == other.other
    }

    /// Copy of this id carrying `seqid`.
    pub fn with_seqid(&self, seqid: u32) -> Self {
        Self {
            seqid,
            other: self.other,
        }
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for b in &self.other {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ", seq: {}]", self.seqid)
    }
}

/// Validate a client-presented state id against the current one.
///
/// A seqid of zero means "most recent" and is always accepted. A seqid
/// ahead of the server's was never issued; one behind it is stale.
pub fn check_state_id(expected: &StateId, given: &StateId) -> Result<(), NfsError> {
    if given.seqid == 0 {
        return Ok(());
    }

    if given.seqid > expected.seqid {
        return Err(NfsError::BadStateId(*given));
    }

    if given.seqid < expected.seqid {
        return Err(NfsError::OldStateId {
            given: *given,
            current: expected.seqid,
        });
    }

    Ok(())
}

/// NFSv4.1 session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; SESSIONID_SIZE]);

impl SessionId {
    pub fn new(client_id: ClientId, sequence: u32) -> Self {
        let mut id = [0u8; SESSIONID_SIZE];
        id[..8].copy_from_slice(&client_id.to_bytes());
        id[12..].copy_from_slice(&sequence.to_be_bytes());
        Self(id)
    }

    pub fn client_id(&self) -> ClientId {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[..8]);
        ClientId(u64::from_be_bytes(id))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Eight-byte verifier (`verifier4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Verifier(pub [u8; 8]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_layout() {
        let id = ClientId::from_parts(0x6500_0000, 3, 42);
        assert_eq!(id.boot_secs(), 0x6500_0000);
        assert_eq!(id.instance_id(), 3);
        assert_eq!(id.0 & 0x00ff_ffff, 42);
    }

    #[test]
    fn test_generators_of_different_instances_never_collide() {
        let a = ClientIdGenerator::new(1000, 1);
        let b = ClientIdGenerator::new(1000, 2);
        let ids_a: Vec<_> = (0..100).map(|_| a.next()).collect();
        let ids_b: Vec<_> = (0..100).map(|_| b.next()).collect();
        assert!(ids_a.iter().all(|id| !ids_b.contains(id)));
        assert!(ids_a.windows(2).all(|w| w[0] < w[1]));
        assert!(a.issued(ids_a[0]));
        assert!(!a.issued(ids_b[0]));
    }

    #[test]
    fn test_state_id_layout() {
        let client = ClientId(0x0102_0304_0506_0708);
        let stateid = StateId::new(client, 0x00ab_cdef, StateType::Lock);
        assert_eq!(&stateid.other[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&stateid.other[8..11], &[0xab, 0xcd, 0xef]);
        assert_eq!(stateid.other[11], 2);
        assert_eq!(stateid.client_id(), client);
        assert_eq!(stateid.state_type(), Some(StateType::Lock));
        assert_eq!(stateid.seqid, 0);
    }

    #[test]
    fn test_session_id_layout() {
        let client = ClientId(0x1122_3344_5566_7788);
        let session = SessionId::new(client, 5);
        assert_eq!(session.client_id(), client);
        assert_eq!(&session.0[8..12], &[0, 0, 0, 0]);
        assert_eq!(&session.0[12..], &[0, 0, 0, 5]);
    }

    #[test]
    fn test_check_state_id() {
        let current = StateId::new(ClientId(1), 1, StateType::Open).with_seqid(5);

        assert!(check_state_id(&current, &current.with_seqid(5)).is_ok());
        assert!(check_state_id(&current, &current.with_seqid(0)).is_ok());
        assert!(matches!(
            check_state_id(&current, &current.with_seqid(6)),
            Err(NfsError::BadStateId(_))
        ));
        assert!(matches!(
            check_state_id(&current, &current.with_seqid(4)),
            Err(NfsError::OldStateId { current: 5, .. })
        ));
    }
}
