// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # NFS Client Record
//!
//! Server-side record of one registered client: identity, lease, sessions,
//! owners and every piece of state the client holds.
//!
//! ## Lifecycle
//!
//! ```text
//! EXCHANGE_ID / SETCLIENTID      → NfsClient::new (unconfirmed)
//! CREATE_SESSION / SETCLIENTID_CONFIRM → confirm()
//! SEQUENCE / RENEW / v4.0 I/O    → update_lease_time()
//! DESTROY_CLIENTID / lease expiry → try_dispose() / dispose_ignore_failures()
//! ```
//!
//! ## Invariants
//!
//! - Confirmation is monotonic.
//! - The lease expiry only moves forward.
//! - The record's mutex is a leaf lock: nothing else is locked and no
//!   listener runs while it is held, so it may be taken under a file stripe.

use crate::domain::errors::NfsError;
use crate::domain::file_store::FileId;
use crate::domain::owner::StateOwner;
use crate::domain::session::{ChannelAttributes, NfsSession};
use crate::domain::state::NfsState;
use crate::domain::stateid::{
    ClientId, SessionId, StateId, StateType, Verifier, STATEID_OTHER_SIZE,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Initial CREATE_SESSION sequence id handed out by EXCHANGE_ID.
pub const INITIAL_SESSION_SEQUENCE: u32 = 1;

/// Client back channel used to recall state.
pub trait CallbackChannel: Send + Sync {
    /// CB_NULL: verify the back channel is usable.
    fn ping(&self) -> Result<(), NfsError>;

    /// CB_RECALL: ask the client to return a delegation.
    fn recall(&self, file: &FileId, stateid: &StateId, truncate: bool) -> Result<(), NfsError>;
}

/// What a client presents when registering.
#[derive(Debug, Clone)]
pub struct ClientRegistration {
    /// Long-lived client owner token (`co_ownerid` / `id`).
    pub owner: Vec<u8>,
    /// Changes whenever the client reboots.
    pub verifier: Verifier,
    /// Authenticated principal of the registering RPC.
    pub principal: String,
    pub client_address: SocketAddr,
    pub local_address: SocketAddr,
    pub minor_version: u32,
}

struct ClientInner {
    sessions: HashMap<SessionId, Arc<NfsSession>>,
    owners: HashMap<Vec<u8>, Arc<StateOwner>>,
    states: HashMap<[u8; STATEID_OTHER_SIZE], Arc<NfsState>>,
    session_sequence: u32,
}

/// Registered NFSv4 client
pub struct NfsClient {
    id: ClientId,
    registration: ClientRegistration,
    server_verifier: Verifier,
    lease_time: Duration,
    created: Instant,
    /// Lease expiry in milliseconds since `created`.
    lease_expiry: AtomicU64,
    confirmed: AtomicBool,
    need_reclaim: AtomicBool,
    reclaim_completed: AtomicBool,
    disposed: AtomicBool,
    state_counter: AtomicU32,
    session_counter: AtomicU32,
    callback: RwLock<Option<Arc<dyn CallbackChannel>>>,
    inner: Mutex<ClientInner>,
}

impl NfsClient {
    pub fn new(
        id: ClientId,
        registration: ClientRegistration,
        lease_time: Duration,
        need_reclaim: bool,
    ) -> Self {
        let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        let client = Self {
            id,
            registration,
            server_verifier: Verifier((stamp ^ id.0).to_be_bytes()),
            lease_time,
            created: Instant::now(),
            lease_expiry: AtomicU64::new(0),
            confirmed: AtomicBool::new(false),
            need_reclaim: AtomicBool::new(need_reclaim),
            reclaim_completed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            state_counter: AtomicU32::new(0),
            session_counter: AtomicU32::new(0),
            callback: RwLock::new(None),
            inner: Mutex::new(ClientInner {
                sessions: HashMap::new(),
                owners: HashMap::new(),
                states: HashMap::new(),
                session_sequence: INITIAL_SESSION_SEQUENCE,
            }),
        };
        client.refresh_lease_time();
        client
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn owner(&self) -> &[u8] {
        &self.registration.owner
    }

    pub fn verifier(&self) -> Verifier {
        self.registration.verifier
    }

    pub fn verifier_equals(&self, verifier: &Verifier) -> bool {
        self.registration.verifier == *verifier
    }

    /// Verifier returned by SETCLIENTID and checked by SETCLIENTID_CONFIRM.
    pub fn server_verifier(&self) -> Verifier {
        self.server_verifier
    }

    pub fn principal(&self) -> &str {
        &self.registration.principal
    }

    pub fn client_address(&self) -> SocketAddr {
        self.registration.client_address
    }

    pub fn local_address(&self) -> SocketAddr {
        self.registration.local_address
    }

    pub fn minor_version(&self) -> u32 {
        self.registration.minor_version
    }

    /// Session based clients (v4.1+) need no owner seqids or OPEN_CONFIRM.
    pub fn is_session_based(&self) -> bool {
        self.registration.minor_version > 0
    }

    // ========================================================================
    // Confirmation and lease
    // ========================================================================

    pub fn is_confirmed(&self) -> bool {
        self.confirmed.load(Ordering::Acquire)
    }

    pub fn confirm(&self) {
        self.confirmed.store(true, Ordering::Release);
    }

    pub fn lease_time(&self) -> Duration {
        self.lease_time
    }

    fn elapsed_millis(&self) -> u64 {
        self.created.elapsed().as_millis() as u64
    }

    pub fn is_lease_valid(&self) -> bool {
        self.elapsed_millis() < self.lease_expiry.load(Ordering::Acquire)
    }

    /// Extend the lease unconditionally.
    pub fn refresh_lease_time(&self) {
        let expiry = self.elapsed_millis() + self.lease_time.as_millis() as u64;
        self.lease_expiry.fetch_max(expiry, Ordering::AcqRel);
    }

    /// Extend a lease that has not yet expired.
    pub fn update_lease_time(&self) -> Result<(), NfsError> {
        if !self.is_lease_valid() {
            return Err(NfsError::Expired(self.id.0));
        }
        self.refresh_lease_time();
        Ok(())
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Whether the client held state before this server start and has not
    /// finished reclaiming it.
    pub fn need_reclaim(&self) -> bool {
        self.need_reclaim.load(Ordering::Acquire)
    }

    pub fn is_reclaim_completed(&self) -> bool {
        self.reclaim_completed.load(Ordering::Acquire)
    }

    /// RECLAIM_COMPLETE for this client.
    pub fn reclaim_complete(&self) -> Result<(), NfsError> {
        if self.reclaim_completed.swap(true, Ordering::AcqRel) {
            return Err(NfsError::CompleteAlready);
        }
        self.need_reclaim.store(false, Ordering::Release);
        Ok(())
    }

    // ========================================================================
    // Callback channel
    // ========================================================================

    pub fn callback(&self) -> Option<Arc<dyn CallbackChannel>> {
        self.callback.read().clone()
    }

    pub fn set_callback(&self, callback: Option<Arc<dyn CallbackChannel>>) {
        *self.callback.write() = callback;
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Sequence id the next CREATE_SESSION must carry.
    pub fn session_sequence(&self) -> u32 {
        self.inner.lock().session_sequence
    }

    /// Create a session. The first successful CREATE_SESSION confirms the
    /// client.
    pub fn create_session(
        &self,
        sequence: u32,
        attributes: ChannelAttributes,
    ) -> Result<Arc<NfsSession>, NfsError> {
        let mut inner = self.inner.lock();
        if sequence != inner.session_sequence {
            return Err(NfsError::SeqMisordered {
                expected: inner.session_sequence,
                given: sequence,
            });
        }
        inner.session_sequence = inner.session_sequence.wrapping_add(1);

        let counter = self.session_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let session = Arc::new(NfsSession::new(
            SessionId::new(self.id, counter),
            self.id,
            attributes,
        ));
        inner.sessions.insert(session.id(), session.clone());
        drop(inner);

        self.confirm();
        debug!(client = %self.id, session = %session.id(), "Session created");
        Ok(session)
    }

    pub fn session(&self, id: &SessionId) -> Result<Arc<NfsSession>, NfsError> {
        self.inner
            .lock()
            .sessions
            .get(id)
            .cloned()
            .ok_or(NfsError::BadSession)
    }

    pub fn remove_session(&self, id: &SessionId) -> Result<Arc<NfsSession>, NfsError> {
        self.inner
            .lock()
            .sessions
            .remove(id)
            .ok_or(NfsError::BadSession)
    }

    pub fn sessions(&self) -> Vec<Arc<NfsSession>> {
        self.inner.lock().sessions.values().cloned().collect()
    }

    pub fn has_sessions(&self) -> bool {
        !self.inner.lock().sessions.is_empty()
    }

    // ========================================================================
    // Owners and state
    // ========================================================================

    /// Find or register an open/lock owner. `seqid` seeds new v4.0 owners.
    pub fn get_or_create_owner(&self, owner: &[u8], seqid: u32) -> Arc<StateOwner> {
        let session_based = self.is_session_based();
        self.inner
            .lock()
            .owners
            .entry(owner.to_vec())
            .or_insert_with(|| {
                Arc::new(StateOwner::new(self.id, owner.to_vec(), seqid, session_based))
            })
            .clone()
    }

    pub fn find_owner(&self, owner: &[u8]) -> Option<Arc<StateOwner>> {
        self.inner.lock().owners.get(owner).cloned()
    }

    pub fn release_owner(&self, owner: &[u8]) {
        self.inner.lock().owners.remove(owner);
    }

    /// Allocate a state id of `state_type` for this client.
    pub fn create_state_id(&self, state_type: StateType) -> StateId {
        let counter = self.state_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        StateId::new(self.id, counter, state_type)
    }

    /// Create a state and attach it to this client. Session based clients
    /// get it pre-confirmed.
    pub fn create_state(
        &self,
        owner: Arc<StateOwner>,
        state_type: StateType,
        parent: Option<Arc<NfsState>>,
    ) -> Arc<NfsState> {
        let state = Arc::new(NfsState::new(self.create_state_id(state_type), owner, parent));
        if self.is_session_based() {
            state.confirm();
        }
        self.attach_state(state.clone());
        state
    }

    pub fn attach_state(&self, state: Arc<NfsState>) {
        let stateid = state.stateid();
        self.inner.lock().states.insert(stateid.other, state);
    }

    /// Remove a state from this client without disposing it.
    pub fn detach_state(&self, stateid: &StateId) -> Option<Arc<NfsState>> {
        self.inner.lock().states.remove(&stateid.other)
    }

    pub fn state(&self, stateid: &StateId) -> Result<Arc<NfsState>, NfsError> {
        self.inner
            .lock()
            .states
            .get(&stateid.other)
            .cloned()
            .ok_or(NfsError::BadStateId(*stateid))
    }

    pub fn states(&self) -> Vec<Arc<NfsState>> {
        self.inner.lock().states.values().cloned().collect()
    }

    /// Dispose a state and forget it. The state stays attached if a dispose
    /// listener fails.
    pub fn release_state(&self, stateid: &StateId) -> Result<(), NfsError> {
        let state = self.state(stateid)?;
        state.try_dispose()?;
        self.detach_state(stateid);
        Ok(())
    }

    pub fn has_state(&self) -> bool {
        !self.inner.lock().states.is_empty()
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// States in disposal order: derived states before the opens they
    /// derive from.
    fn states_for_disposal(&self) -> Vec<Arc<NfsState>> {
        let mut states = self.states();
        states.sort_by_key(|s| s.parent().is_none());
        states
    }

    /// Release everything the client holds, stopping at the first failure.
    pub fn try_dispose(&self) -> Result<(), NfsError> {
        if self.is_disposed() {
            return Ok(());
        }

        for state in self.states_for_disposal() {
            state.try_dispose()?;
            self.detach_state(&state.stateid());
        }

        self.finish_dispose();
        Ok(())
    }

    /// Release everything the client holds, logging failures.
    pub fn dispose_ignore_failures(&self) {
        if self.is_disposed() {
            return;
        }

        for state in self.states_for_disposal() {
            state.dispose_ignore_failures();
            self.detach_state(&state.stateid());
        }

        self.finish_dispose();
    }

    fn finish_dispose(&self) {
        let mut inner = self.inner.lock();
        if !inner.states.is_empty() {
            warn!(client = %self.id, states = inner.states.len(), "States attached during client disposal");
        }
        inner.sessions.clear();
        inner.owners.clear();
        drop(inner);
        self.set_callback(None);
        self.disposed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for NfsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NfsClient")
            .field("id", &self.id)
            .field("principal", &self.registration.principal)
            .field("client_address", &self.registration.client_address)
            .field("minor_version", &self.registration.minor_version)
            .field("confirmed", &self.is_confirmed())
            .finish()
    }
}
