// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Client Registry Application Service
//!
//! Process-wide table of registered clients and the entry point the request
//! dispatcher uses to bind a compound to a client, session and slot.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Collaborators:** [`FileTracker`] (share reservations),
//!   [`RecoveryStore`] (grace period bookkeeping)
//! - **Background tasks:** lease sweep and grace timer, see
//!   [`crate::application::lifecycle`]
//!
//! # Locking
//!
//! The client table is a `RwLock`: lookups take the read lock, insert and
//! remove take the write lock. Disposal and recovery store calls run after
//! the lock is released.

use crate::application::file_tracker::FileTracker;
use crate::application::lifecycle::RegistryLifecycle;
use crate::domain::client::{ClientRegistration, NfsClient};
use crate::domain::config::StateConfig;
use crate::domain::errors::NfsError;
use crate::domain::recovery::RecoveryStore;
use crate::domain::session::{ChannelAttributes, NfsSession, SessionConnection};
use crate::domain::slot::SlotAcquire;
use crate::domain::stateid::{
    check_state_id, ClientId, ClientIdGenerator, SessionId, StateId, Verifier,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of resolving an EXCHANGE_ID / SETCLIENTID registration.
#[derive(Clone)]
pub enum RegisterOutcome {
    /// First registration of this owner.
    Created(Arc<NfsClient>),
    /// Same owner, verifier and principal: the existing record is reused.
    Existing(Arc<NfsClient>),
    /// The client rebooted (new verifier) or its old record held nothing
    /// worth protecting; the old record was evicted.
    Replaced(Arc<NfsClient>),
}

impl RegisterOutcome {
    pub fn client(&self) -> &Arc<NfsClient> {
        match self {
            Self::Created(c) | Self::Existing(c) | Self::Replaced(c) => c,
        }
    }
}

/// A compound bound to its session slot by SEQUENCE.
pub struct SequenceOutcome {
    pub client: Arc<NfsClient>,
    pub session: Arc<NfsSession>,
    pub slot_id: u32,
    pub highest_slot: u32,
    pub acquire: SlotAcquire,
}

pub struct ClientRegistry {
    config: StateConfig,
    ids: ClientIdGenerator,
    clients: RwLock<HashMap<ClientId, Arc<NfsClient>>>,
    file_tracker: Arc<FileTracker>,
    recovery: Arc<dyn RecoveryStore>,
    running: AtomicBool,
    grace_over: AtomicBool,
    lifecycle: RegistryLifecycle,
}

impl ClientRegistry {
    /// Build a registry without starting its background tasks.
    pub fn new(config: StateConfig, recovery: Arc<dyn RecoveryStore>) -> Self {
        let boot_secs = chrono::Utc::now().timestamp() as u32;
        let file_tracker = Arc::new(FileTracker::new(config.lock_stripes()));

        info!(
            instance_id = config.instance_id,
            lease_time = ?config.lease_time,
            grace_period = ?config.grace_period(),
            "Client registry created"
        );

        Self {
            ids: ClientIdGenerator::new(boot_secs, config.instance_id),
            config,
            clients: RwLock::new(HashMap::new()),
            file_tracker,
            recovery,
            running: AtomicBool::new(true),
            grace_over: AtomicBool::new(false),
            lifecycle: RegistryLifecycle::new(),
        }
    }

    /// Build a registry and start the lease sweep and grace timer. Must be
    /// called from within a tokio runtime.
    pub fn launch(config: StateConfig, recovery: Arc<dyn RecoveryStore>) -> Arc<Self> {
        let registry = Arc::new(Self::new(config, recovery));
        registry.lifecycle.start(&registry);
        registry
    }

    fn ensure_running(&self) -> Result<(), NfsError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(NfsError::NotRunning);
        }
        Ok(())
    }

    fn publish_active_clients(&self, count: usize) {
        metrics::gauge!("nfs4d_clients_active").set(count as f64);
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Create and insert a new, unconfirmed client record. A record already
    /// registered under the same owner is evicted.
    pub fn create_client(&self, registration: ClientRegistration) -> Result<Arc<NfsClient>, NfsError> {
        self.admit(registration, false)
            .map(|outcome| outcome.client().clone())
    }

    /// Resolve an EXCHANGE_ID / SETCLIENTID against existing records with
    /// the same owner token.
    pub fn register_client(&self, registration: ClientRegistration) -> Result<RegisterOutcome, NfsError> {
        self.admit(registration, true)
    }

    /// Owner lookup and insert happen under one write lock, so concurrent
    /// registrations of one owner never leave two live records.
    fn admit(&self, registration: ClientRegistration, reuse: bool) -> Result<RegisterOutcome, NfsError> {
        self.ensure_running()?;

        let need_reclaim = self.recovery.want_reclaim(&registration.owner)?;
        let owner = registration.owner.clone();

        let (client, evicted, active) = {
            let mut clients = self.clients.write();
            let existing = clients
                .values()
                .find(|c| c.owner() == owner.as_slice())
                .cloned();

            if let Some(existing) = &existing {
                if reuse {
                    if let Some(outcome) = Self::resolve_existing(existing, &registration)? {
                        return Ok(outcome);
                    }
                }
                clients.remove(&existing.id());
            }

            let client = Arc::new(NfsClient::new(
                self.ids.next(),
                registration,
                self.config.lease_time,
                need_reclaim,
            ));
            clients.insert(client.id(), client.clone());
            (client, existing, clients.len())
        };

        if let Some(old) = &evicted {
            info!(client = %old.id(), replacement = %client.id(), "Client re-registered, dropping previous instance");
            old.dispose_ignore_failures();
        }

        if let Err(e) = self.recovery.add_client(&owner) {
            error!(client = %client.id(), error = ?e, "Failed to record client for recovery");
            self.detach(&client);
            return Err(e.into());
        }

        metrics::counter!("nfs4d_clients_created_total").increment(1);
        self.publish_active_clients(active);
        info!(
            client = %client.id(),
            address = %client.client_address(),
            minor_version = client.minor_version(),
            need_reclaim,
            "New client"
        );

        Ok(match evicted {
            Some(_) => RegisterOutcome::Replaced(client),
            None => RegisterOutcome::Created(client),
        })
    }

    /// Decide what a registration does to a live record of the same owner.
    /// `None` means the record is to be replaced.
    fn resolve_existing(
        existing: &Arc<NfsClient>,
        registration: &ClientRegistration,
    ) -> Result<Option<RegisterOutcome>, NfsError> {
        let lease_valid = existing.is_lease_valid();
        let same_principal = existing.principal() == registration.principal;

        if !same_principal && existing.has_state() && lease_valid {
            warn!(
                client = %existing.id(),
                principal = %registration.principal,
                "Client owner in use by another principal"
            );
            return Err(NfsError::ClidInUse);
        }

        // an expired record must not come back to life with its old state
        if same_principal
            && lease_valid
            && existing.verifier_equals(&registration.verifier)
            && !existing.is_disposed()
        {
            existing.refresh_lease_time();
            return Ok(Some(RegisterOutcome::Existing(existing.clone())));
        }

        Ok(None)
    }

    /// SETCLIENTID_CONFIRM: confirm a v4.0 client that presents the server
    /// verifier handed out at SETCLIENTID.
    pub fn confirm_client(&self, id: ClientId, verifier: &Verifier) -> Result<Arc<NfsClient>, NfsError> {
        let client = self.client_by_id(id)?;
        if client.server_verifier() != *verifier {
            return Err(NfsError::StaleClientId(id.0));
        }
        client.update_lease_time()?;
        client.confirm();
        Ok(client)
    }

    /// Remove a client and release everything it holds (DESTROY_CLIENTID).
    ///
    /// Disposal is fail-fast: if a state cannot be released the client stays
    /// registered and the error is returned. Removing an unknown client is a
    /// no-op.
    pub fn remove_client(&self, id: ClientId) -> Result<(), NfsError> {
        self.ensure_running()?;

        let Some(client) = self.clients.read().get(&id).cloned() else {
            return Ok(());
        };

        client.try_dispose()?;
        self.detach(&client);
        self.recovery.remove_client(client.owner())?;
        info!(client = %id, "Client removed");
        Ok(())
    }

    /// Best-effort removal of a record that is being replaced. The recovery
    /// record stays, the replacement reuses it.

    /// Drop `client` from the table if it is still the registered record.
    fn detach(&self, client: &Arc<NfsClient>) -> bool {
        let (removed, active) = {
            let mut clients = self.clients.write();
            let removed = match clients.get(&client.id()) {
                Some(current) if Arc::ptr_eq(current, client) => {
                    clients.remove(&client.id());
                    true
                }
                _ => false,
            };
            (removed, clients.len())
        };
        self.publish_active_clients(active);
        removed
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn client_by_id(&self, id: ClientId) -> Result<Arc<NfsClient>, NfsError> {
        self.ensure_running()?;
        self.clients
            .read()
            .get(&id)
            .cloned()
            .ok_or(NfsError::StaleClientId(id.0))
    }

    pub fn confirmed_client(&self, id: ClientId) -> Result<Arc<NfsClient>, NfsError> {
        let client = self.client_by_id(id)?;
        if !client.is_confirmed() {
            return Err(NfsError::StaleClientId(id.0));
        }
        Ok(client)
    }

    /// Client owning the session `id`.
    pub fn client_by_session(&self, id: &SessionId) -> Result<Arc<NfsClient>, NfsError> {
        self.ensure_running()?;
        let client = self
            .clients
            .read()
            .get(&id.client_id())
            .cloned()
            .ok_or(NfsError::BadSession)?;
        client.session(id)?;
        Ok(client)
    }

    /// Client owning `stateid`. Ids minted by a previous server instance are
    /// stale; ids of this instance whose client is gone are bad.
    pub fn client_by_state_id(&self, stateid: &StateId) -> Result<Arc<NfsClient>, NfsError> {
        self.ensure_running()?;
        let id = stateid.client_id();
        if !self.ids.issued(id) {
            return Err(NfsError::StaleStateId(*stateid));
        }
        self.clients
            .read()
            .get(&id)
            .cloned()
            .ok_or(NfsError::BadStateId(*stateid))
    }

    /// Linear scan for the record registered under `owner`.
    pub fn client_by_owner(&self, owner: &[u8]) -> Result<Option<Arc<NfsClient>>, NfsError> {
        self.ensure_running()?;
        Ok(self
            .clients
            .read()
            .values()
            .find(|c| c.owner() == owner)
            .cloned())
    }

    pub fn clients(&self) -> Result<Vec<Arc<NfsClient>>, NfsError> {
        self.ensure_running()?;
        Ok(self.clients.read().values().cloned().collect())
    }

    /// Renew the lease of the client owning `stateid` (v4.0 implicit
    /// renewal by READ, WRITE and locking operations).
    pub fn update_client_lease_time(&self, stateid: &StateId) -> Result<Arc<NfsClient>, NfsError> {
        let client = self.client_by_state_id(stateid)?;
        let state = client.state(stateid)?;
        if !state.is_confirmed() {
            return Err(NfsError::BadStateId(*stateid));
        }
        check_state_id(&state.stateid(), stateid)?;
        client.update_lease_time()?;
        Ok(client)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// CREATE_SESSION. Requested channel limits are capped to the configured
    /// server maximums.
    pub fn create_session(
        &self,
        id: ClientId,
        sequence: u32,
        requested: ChannelAttributes,
    ) -> Result<(Arc<NfsClient>, Arc<NfsSession>), NfsError> {
        let client = self.client_by_id(id)?;

        let attributes = ChannelAttributes {
            max_requests: requested.max_requests.min(self.config.max_slots).max(1),
            max_operations: requested.max_operations.min(self.config.max_operations),
            max_cb_operations: requested.max_cb_operations.min(self.config.max_cb_operations),
            cb_program: requested.cb_program,
        };

        let session = client.create_session(sequence, attributes)?;
        client.refresh_lease_time();
        metrics::counter!("nfs4d_sessions_created_total").increment(1);
        debug!(
            client = %id,
            session = %session.id(),
            slots = attributes.max_requests,
            "Session created"
        );
        Ok((client, session))
    }

    /// DESTROY_SESSION, allowed from a bound connection or when the session
    /// has no bound connection.
    pub fn destroy_session(&self, id: &SessionId, connection: &SessionConnection) -> Result<(), NfsError> {
        let client = self.client_by_session(id)?;
        let session = client.session(id)?;
        if !session.is_releasable_by(connection) {
            return Err(NfsError::ConnNotBoundToSession);
        }
        client.remove_session(id)?;
        debug!(client = %client.id(), session = %id, "Session destroyed");
        Ok(())
    }

    /// SEQUENCE: resolve session and slot, renew the lease and decide
    /// whether the compound executes or replays.
    pub fn sequence(
        &self,
        id: &SessionId,
        slot_id: u32,
        sequence: u32,
        operations: u32,
        connection: SessionConnection,
    ) -> Result<SequenceOutcome, NfsError> {
        let client = self.client_by_session(id)?;
        let session = client.session(id)?;
        session.check_compound(operations)?;
        if !client.is_lease_valid() {
            return Err(NfsError::Expired(client.id().0));
        }

        let acquire = session.slot(slot_id)?.acquire(sequence)?;
        client.refresh_lease_time();
        session.bind_if_needed(connection);
        Ok(SequenceOutcome {
            highest_slot: session.highest_slot(),
            client,
            session,
            slot_id,
            acquire,
        })
    }

    // ========================================================================
    // Grace period
    // ========================================================================

    /// Whether clients of the previous server instance may still reclaim.
    pub fn is_grace_period(&self) -> Result<bool, NfsError> {
        self.ensure_running()?;
        if self.grace_over.load(Ordering::Acquire) {
            return Ok(false);
        }
        Ok(self.recovery.waiting_for_reclaim()?)
    }

    /// Validate an OPEN or LOCK against the grace period.
    ///
    /// Reclaims are only accepted during grace and only from clients known
    /// to the previous instance. New state is refused during grace until the
    /// client has finished reclaiming.
    pub fn check_grace(&self, client: &NfsClient, reclaim: bool) -> Result<(), NfsError> {
        let grace = self.is_grace_period()?;
        if reclaim {
            if !grace || client.is_reclaim_completed() {
                return Err(NfsError::NoGrace);
            }
            if !client.need_reclaim() {
                return Err(NfsError::ReclaimBad);
            }
            return Ok(());
        }

        if grace && !client.is_reclaim_completed() {
            return Err(NfsError::Grace);
        }
        Ok(())
    }

    pub fn want_reclaim(&self, client: &NfsClient) -> Result<bool, NfsError> {
        self.ensure_running()?;
        Ok(self.recovery.want_reclaim(client.owner())?)
    }

    /// RECLAIM_COMPLETE for one client.
    pub fn reclaim_complete(&self, client: &NfsClient) -> Result<(), NfsError> {
        self.ensure_running()?;
        client.reclaim_complete()?;
        self.recovery.reclaim_client(client.owner())?;
        if !self.recovery.waiting_for_reclaim()? {
            debug!(client = %client.id(), "Last expected client finished reclaiming");
        }
        Ok(())
    }

    /// Close the grace window for the rest of this process lifetime.
    pub fn end_grace_period(&self) -> Result<(), NfsError> {
        self.ensure_running()?;
        if self.grace_over.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.recovery.reclaim_complete()?;
        info!("Grace period ended");
        Ok(())
    }

    // ========================================================================
    // Lease expiry
    // ========================================================================

    /// Evict every client whose lease expired. Failures are logged and the
    /// sweep continues. Returns the number of evicted clients.
    pub fn sweep_expired_clients(&self) -> usize {
        if self.ensure_running().is_err() {
            return 0;
        }

        let expired: Vec<Arc<NfsClient>> = self
            .clients
            .read()
            .values()
            .filter(|c| !c.is_lease_valid())
            .cloned()
            .collect();

        let mut evicted = 0;
        for client in expired {
            client.dispose_ignore_failures();
            if !self.detach(&client) {
                continue;
            }
            if let Err(e) = self.recovery.remove_client(client.owner()) {
                warn!(client = %client.id(), error = ?e, "Failed to drop recovery record of expired client");
            }
            info!(client = %client.id(), "Client lease expired");
            metrics::counter!("nfs4d_clients_expired_total").increment(1);
            evicted += 1;
        }
        evicted
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop background tasks, release every client and close the recovery
    /// store. Every later operation fails with [`NfsError::NotRunning`].
    pub fn shutdown(&self) -> Result<(), NfsError> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        self.lifecycle.stop();

        let drained: Vec<Arc<NfsClient>> = self.clients.write().drain().map(|(_, c)| c).collect();
        info!(clients = drained.len(), "Shutting down client registry");
        for client in drained {
            client.dispose_ignore_failures();
        }
        self.publish_active_clients(0);

        self.recovery.close()?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn lease_time(&self) -> Duration {
        self.config.lease_time
    }

    pub fn instance_id(&self) -> u8 {
        self.ids.instance_id()
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    pub fn file_tracker(&self) -> &Arc<FileTracker> {
        &self.file_tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stateid::StateType;
    use crate::infrastructure::recovery::EphemeralRecoveryStore;
    use std::sync::Barrier;
    use std::thread;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(StateConfig::default(), Arc::new(EphemeralRecoveryStore::new()))
    }

    fn registration(owner: &str, principal: &str, verifier: u8) -> ClientRegistration {
        ClientRegistration {
            owner: owner.as_bytes().to_vec(),
            verifier: Verifier([verifier; 8]),
            principal: principal.to_string(),
            client_address: "192.168.1.20:833".parse().unwrap(),
            local_address: "192.168.1.1:2049".parse().unwrap(),
            minor_version: 1,
        }
    }

    fn attributes(slots: u32) -> ChannelAttributes {
        ChannelAttributes {
            max_requests: slots,
            max_operations: 1024,
            max_cb_operations: 64,
            cb_program: 0x4000_0000,
        }
    }

    fn connection() -> SessionConnection {
        SessionConnection::new(
            "192.168.1.1:2049".parse().unwrap(),
            "192.168.1.20:833".parse().unwrap(),
        )
    }

    #[test]
    fn test_register_same_verifier_returns_existing() {
        let registry = registry();
        let first = registry.register_client(registration("host-a", "alice", 1)).unwrap();
        let second = registry.register_client(registration("host-a", "alice", 1)).unwrap();

        assert!(matches!(first, RegisterOutcome::Created(_)));
        assert!(matches!(second, RegisterOutcome::Existing(_)));
        assert_eq!(first.client().id(), second.client().id());
    }

    #[test]
    fn test_register_new_verifier_replaces() {
        let registry = registry();
        let first = registry.register_client(registration("host-a", "alice", 1)).unwrap();
        let second = registry.register_client(registration("host-a", "alice", 2)).unwrap();

        assert!(matches!(second, RegisterOutcome::Replaced(_)));
        assert_ne!(first.client().id(), second.client().id());
        assert!(first.client().is_disposed());
        assert!(matches!(
            registry.client_by_id(first.client().id()),
            Err(NfsError::StaleClientId(_))
        ));
        assert_eq!(registry.clients().unwrap().len(), 1);
    }

    #[test]
    fn test_register_other_principal_with_state_is_refused() {
        let registry = registry();
        let first = registry.register_client(registration("host-a", "alice", 1)).unwrap();
        let owner = first.client().get_or_create_owner(b"open-owner", 0);
        first.client().create_state(owner, StateType::Open, None);

        assert!(matches!(
            registry.register_client(registration("host-a", "mallory", 1)),
            Err(NfsError::ClidInUse)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_after_lease_expiry_replaces() {
        let registry = registry();
        let first = registry.register_client(registration("host-a", "alice", 1)).unwrap();
        let owner = first.client().get_or_create_owner(b"open-owner", 0);
        first.client().create_state(owner, StateType::Open, None);

        tokio::time::advance(Duration::from_secs(91)).await;

        let second = registry.register_client(registration("host-a", "alice", 1)).unwrap();
        assert!(matches!(second, RegisterOutcome::Replaced(_)));
        assert_ne!(first.client().id(), second.client().id());
        assert!(first.client().is_disposed());
        assert!(!second.client().has_state());
        assert_eq!(registry.clients().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_after_lease_expiry_fails() {
        let registry = registry();
        let client = registry.create_client(registration("host-a", "alice", 0)).unwrap();

        tokio::time::advance(Duration::from_secs(91)).await;

        assert!(matches!(
            registry.confirm_client(client.id(), &client.server_verifier()),
            Err(NfsError::Expired(_))
        ));
        assert!(!client.is_confirmed());
    }

    #[test]
    fn test_concurrent_registration_keeps_one_record() {
        let registry = Arc::new(registry());
        let start = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    registry.register_client(registration("host-a", "alice", 1)).unwrap()
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let created = outcomes
            .iter()
            .filter(|o| matches!(o, RegisterOutcome::Created(_)))
            .count();
        assert_eq!(created, 1);
        assert!(outcomes
            .iter()
            .all(|o| o.client().id() == outcomes[0].client().id()));
        assert_eq!(registry.clients().unwrap().len(), 1);
        assert!(!outcomes[0].client().is_disposed());
    }

    #[test]
    fn test_confirm_client_checks_server_verifier() {
        let registry = registry();
        let client = registry.create_client(registration("host-a", "alice", 1)).unwrap();

        assert!(matches!(
            registry.confirm_client(client.id(), &Verifier([0xff; 8])),
            Err(NfsError::StaleClientId(_))
        ));
        assert!(matches!(registry.confirmed_client(client.id()), Err(NfsError::StaleClientId(_))));

        registry.confirm_client(client.id(), &client.server_verifier()).unwrap();
        assert!(registry.confirmed_client(client.id()).is_ok());
    }

    #[test]
    fn test_session_limits_are_capped() {
        let registry = registry();
        let client = registry.create_client(registration("host-a", "alice", 1)).unwrap();
        let (_, session) = registry.create_session(client.id(), 1, attributes(10_000)).unwrap();

        assert_eq!(session.attributes().max_requests, 128);
        assert_eq!(session.attributes().max_operations, 128);
        assert_eq!(session.attributes().max_cb_operations, 16);
        assert!(client.is_confirmed());
        assert!(matches!(
            registry.create_session(client.id(), 1, attributes(4)),
            Err(NfsError::SeqMisordered { expected: 2, given: 1 })
        ));
    }

    #[test]
    fn test_sequence_executes_then_replays() {
        let registry = registry();
        let client = registry.create_client(registration("host-a", "alice", 1)).unwrap();
        let (_, session) = registry.create_session(client.id(), 1, attributes(4)).unwrap();

        let outcome = registry.sequence(&session.id(), 0, 1, 3, connection()).unwrap();
        assert!(matches!(outcome.acquire, SlotAcquire::Execute));
        assert_eq!(outcome.highest_slot, 3);
        session.slot(0).unwrap().update(bytes::Bytes::from_static(b"reply"));

        let replay = registry.sequence(&session.id(), 0, 1, 3, connection()).unwrap();
        match replay.acquire {
            SlotAcquire::Replay(reply) => assert_eq!(&reply[..], b"reply"),
            _ => panic!("expected replay"),
        }

        assert!(matches!(
            registry.sequence(&session.id(), 4, 1, 3, connection()),
            Err(NfsError::BadSlot { slot: 4, highest: 3 })
        ));
        assert!(matches!(
            registry.sequence(&session.id(), 0, 2, 129, connection()),
            Err(NfsError::TooManyOps { .. })
        ));
        assert!(session.is_bound_to(&connection()));
    }

    #[test]
    fn test_rejected_sequence_does_not_bind_connection() {
        let registry = registry();
        let client = registry.create_client(registration("host-a", "alice", 1)).unwrap();
        let (_, session) = registry.create_session(client.id(), 1, attributes(4)).unwrap();

        assert!(matches!(
            registry.sequence(&session.id(), 9, 1, 1, connection()),
            Err(NfsError::BadSlot { .. })
        ));
        assert!(matches!(
            registry.sequence(&session.id(), 0, 7, 1, connection()),
            Err(NfsError::SeqMisordered { .. })
        ));
        assert!(session.bound_connections().is_empty());

        registry.sequence(&session.id(), 0, 1, 1, connection()).unwrap();
        assert!(session.is_bound_to(&connection()));
    }

    #[test]
    fn test_destroy_session_from_unbound_connection() {
        let registry = registry();
        let client = registry.create_client(registration("host-a", "alice", 1)).unwrap();
        let (_, session) = registry.create_session(client.id(), 1, attributes(4)).unwrap();
        registry.sequence(&session.id(), 0, 1, 1, connection()).unwrap();

        let other = SessionConnection::new(
            "192.168.1.1:2049".parse().unwrap(),
            "192.168.1.99:700".parse().unwrap(),
        );
        assert!(matches!(
            registry.destroy_session(&session.id(), &other),
            Err(NfsError::ConnNotBoundToSession)
        ));

        registry.destroy_session(&session.id(), &connection()).unwrap();
        assert!(matches!(
            registry.client_by_session(&session.id()),
            Err(NfsError::BadSession)
        ));
    }

    #[test]
    fn test_state_id_of_previous_instance_is_stale() {
        let registry = registry();
        let foreign = StateId::new(ClientId::from_parts(1, 0, 1), 1, StateType::Open);
        assert!(matches!(
            registry.client_by_state_id(&foreign),
            Err(NfsError::StaleStateId(_))
        ));

        let client = registry.create_client(registration("host-a", "alice", 1)).unwrap();
        let orphan = client.create_state_id(StateType::Open);
        registry.remove_client(client.id()).unwrap();
        assert!(matches!(
            registry.client_by_state_id(&orphan),
            Err(NfsError::BadStateId(_))
        ));
    }

    #[test]
    fn test_update_lease_checks_state_seqid() {
        let registry = registry();
        let client = registry.create_client(registration("host-a", "alice", 1)).unwrap();
        registry.create_session(client.id(), 1, attributes(1)).unwrap();
        let owner = client.get_or_create_owner(b"open-owner", 0);
        let state = client.create_state(owner, StateType::Open, None);
        state.bump_seqid();
        let current = state.bump_seqid();

        registry.update_client_lease_time(&current).unwrap();
        registry.update_client_lease_time(&current.with_seqid(0)).unwrap();
        assert!(matches!(
            registry.update_client_lease_time(&current.with_seqid(current.seqid - 1)),
            Err(NfsError::OldStateId { .. })
        ));
    }

    #[test]
    fn test_remove_client_is_idempotent() {
        let registry = registry();
        let client = registry.create_client(registration("host-a", "alice", 1)).unwrap();
        registry.remove_client(client.id()).unwrap();
        registry.remove_client(client.id()).unwrap();
        assert!(client.is_disposed());
    }

    #[test]
    fn test_grace_without_recovery_records() {
        let registry = registry();
        let client = registry.create_client(registration("host-a", "alice", 1)).unwrap();

        assert!(!registry.is_grace_period().unwrap());
        registry.check_grace(&client, false).unwrap();
        assert!(matches!(registry.check_grace(&client, true), Err(NfsError::NoGrace)));

        registry.reclaim_complete(&client).unwrap();
        assert!(matches!(
            registry.reclaim_complete(&client),
            Err(NfsError::CompleteAlready)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_expired_clients() {
        let registry = registry();
        let stale = registry.create_client(registration("host-a", "alice", 1)).unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        let fresh = registry.create_client(registration("host-b", "bob", 1)).unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(registry.sweep_expired_clients(), 1);
        assert!(stale.is_disposed());
        assert!(!fresh.is_disposed());
        assert_eq!(registry.sweep_expired_clients(), 0);
        assert!(matches!(stale.update_lease_time(), Err(NfsError::Expired(_))));
    }

    #[test]
    fn test_operations_fail_after_shutdown() {
        let registry = registry();
        let client = registry.create_client(registration("host-a", "alice", 1)).unwrap();

        registry.shutdown().unwrap();
        registry.shutdown().unwrap();

        assert!(client.is_disposed());
        assert!(!registry.is_running());
        assert!(matches!(registry.client_by_id(client.id()), Err(NfsError::NotRunning)));
        assert!(matches!(
            registry.create_client(registration("host-b", "bob", 1)),
            Err(NfsError::NotRunning)
        ));
        assert_eq!(registry.sweep_expired_clients(), 0);
    }
}
