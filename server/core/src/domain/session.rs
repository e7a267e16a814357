// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # NFSv4.1 Session
//!
//! A bounded table of [`SessionSlot`]s owned by one client, plus the set of
//! transport connections bound to the session.
//!
//! ## Invariants
//!
//! - The slot table size is fixed at creation (`min(requested, server max)`).
//! - Slots are allocated lazily on first use; every slot has its own mutex so
//!   requests on different slots never contend.
//! - Once at least one connection is bound, the session may only be destroyed
//!   through one of the bound connections.

use crate::domain::errors::NfsError;
use crate::domain::slot::SessionSlot;
use crate::domain::stateid::{ClientId, SessionId};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};

/// A transport connection, identified by its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionConnection {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

impl SessionConnection {
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self { local, remote }
    }
}

impl std::fmt::Display for SessionConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <-> {}", self.remote, self.local)
    }
}

/// Channel limits negotiated at CREATE_SESSION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAttributes {
    /// Number of slots of the fore channel reply cache.
    pub max_requests: u32,
    /// Maximal number of operations in a fore channel compound.
    pub max_operations: u32,
    /// Maximal number of operations in a callback compound.
    pub max_cb_operations: u32,
    /// Callback RPC program number.
    pub cb_program: u32,
}

/// NFSv4.1 session
pub struct NfsSession {
    id: SessionId,
    client_id: ClientId,
    attributes: ChannelAttributes,
    slots: Box<[Mutex<Option<SessionSlot>>]>,
    highest_used_slot: AtomicU32,
    bound_connections: Mutex<HashSet<SessionConnection>>,
}

impl NfsSession {
    /// Create a session. `attributes.max_requests` must already be capped to
    /// the server maximum and be at least one.
    pub fn new(id: SessionId, client_id: ClientId, attributes: ChannelAttributes) -> Self {
        let slots = (0..attributes.max_requests.max(1))
            .map(|_| Mutex::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            id,
            client_id,
            attributes,
            slots,
            highest_used_slot: AtomicU32::new(0),
            bound_connections: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn attributes(&self) -> &ChannelAttributes {
        &self.attributes
    }

    /// Highest slot id of this session.
    pub fn highest_slot(&self) -> u32 {
        self.slots.len() as u32 - 1
    }

    /// Highest slot id a client actually used.
    pub fn highest_used_slot(&self) -> u32 {
        self.highest_used_slot.load(Ordering::Relaxed)
    }

    /// Lock slot `slot_id`, allocating it on first use.
    pub fn slot(&self, slot_id: u32) -> Result<MappedMutexGuard<'_, SessionSlot>, NfsError> {
        let cell = self
            .slots
            .get(slot_id as usize)
            .ok_or(NfsError::BadSlot {
                slot: slot_id,
                highest: self.highest_slot(),
            })?;

        self.highest_used_slot.fetch_max(slot_id, Ordering::Relaxed);
        Ok(MutexGuard::map(cell.lock(), |slot| {
            slot.get_or_insert_with(|| SessionSlot::new(slot_id))
        }))
    }

    /// Reject a compound with more operations than negotiated. Runs before
    /// any slot is touched.
    pub fn check_compound(&self, operations: u32) -> Result<(), NfsError> {
        if operations > self.attributes.max_operations {
            return Err(NfsError::TooManyOps {
                requested: operations,
                max: self.attributes.max_operations,
            });
        }
        Ok(())
    }

    /// Bind the first connection that uses an unbound session.
    pub fn bind_if_needed(&self, connection: SessionConnection) {
        let mut bound = self.bound_connections.lock();
        if bound.is_empty() {
            bound.insert(connection);
        }
    }

    /// Explicitly bind `connection` (BIND_CONN_TO_SESSION).
    pub fn bind(&self, connection: SessionConnection) {
        self.bound_connections.lock().insert(connection);
    }

    pub fn unbind(&self, connection: &SessionConnection) -> bool {
        self.bound_connections.lock().remove(connection)
    }

    pub fn is_bound_to(&self, connection: &SessionConnection) -> bool {
        self.bound_connections.lock().contains(connection)
    }

    pub fn bound_connections(&self) -> Vec<SessionConnection> {
        self.bound_connections.lock().iter().copied().collect()
    }

    /// Whether `connection` may destroy this session.
    pub fn is_releasable_by(&self, connection: &SessionConnection) -> bool {
        let bound = self.bound_connections.lock();
        bound.is_empty() || bound.contains(connection)
    }
}

impl std::fmt::Debug for NfsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NfsSession")
            .field("id", &self.id.to_string())
            .field("client_id", &self.client_id)
            .field("attributes", &self.attributes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::slot::SlotAcquire;

    fn session(slots: u32) -> NfsSession {
        NfsSession::new(
            SessionId::new(ClientId(9), 1),
            ClientId(9),
            ChannelAttributes {
                max_requests: slots,
                max_operations: 8,
                max_cb_operations: 2,
                cb_program: 0x4000_0000,
            },
        )
    }

    fn conn(port: u16) -> SessionConnection {
        SessionConnection::new(
            "127.0.0.1:2049".parse().unwrap(),
            format!("127.0.0.1:{port}").parse().unwrap(),
        )
    }

    #[test]
    fn test_slot_range() {
        let session = session(4);
        assert_eq!(session.highest_slot(), 3);
        assert!(session.slot(3).is_ok());
        assert!(matches!(
            session.slot(4),
            Err(NfsError::BadSlot { slot: 4, highest: 3 })
        ));
    }

    #[test]
    fn test_slots_are_independent_and_persistent() {
        let session = session(2);
        assert_eq!(session.slot(0).unwrap().acquire(1).unwrap(), SlotAcquire::Execute);
        assert_eq!(session.slot(1).unwrap().acquire(1).unwrap(), SlotAcquire::Execute);
        assert_eq!(session.slot(0).unwrap().acquire(2).unwrap(), SlotAcquire::Execute);
        assert_eq!(session.slot(0).unwrap().sequence(), 2);
        assert_eq!(session.slot(1).unwrap().sequence(), 1);
        assert_eq!(session.highest_used_slot(), 1);
    }

    #[test]
    fn test_compound_size_limit() {
        let session = session(1);
        assert!(session.check_compound(8).is_ok());
        assert!(matches!(
            session.check_compound(9),
            Err(NfsError::TooManyOps { requested: 9, max: 8 })
        ));
    }

    #[test]
    fn test_binding_controls_release() {
        let session = session(1);
        let a = conn(700);
        let b = conn(701);

        assert!(session.is_releasable_by(&b));

        session.bind_if_needed(a);
        session.bind_if_needed(b);
        assert!(session.is_bound_to(&a));
        assert!(!session.is_bound_to(&b));
        assert!(session.is_releasable_by(&a));
        assert!(!session.is_releasable_by(&b));

        session.bind(b);
        assert!(session.is_releasable_by(&b));
        assert!(session.unbind(&a));
        assert!(!session.is_releasable_by(&a));
    }
}
