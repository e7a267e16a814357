// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # NFS State
//!
//! One unit of server-held state: an open, a byte-range lock, a layout, a
//! delegation or a server-side copy.
//!
//! ## Lifecycle
//!
//! ```text
//! NfsState::new(stateid, owner, parent)
//!   └─ confirm()                       ← immediately (v4.1+) or OPEN_CONFIRM (v4.0)
//!   └─ bump_seqid()                    ← every state-changing operation
//!   └─ try_dispose() / dispose_ignore_failures()
//!         └─ dispose listeners run once, in registration order
//! ```
//!
//! Listeners are taken out of the state before they run, so the state mutex
//! is not held while they call into the file tracker or the lock manager.
//! Disposal itself is serialized: a second caller waits until the first has
//! either finished or put its failed listeners back. A listener that
//! completed is never run again; a listener that failed under
//! [`NfsState::try_dispose`] stays queued and runs on the next attempt.

use crate::domain::errors::NfsError;
use crate::domain::owner::StateOwner;
use crate::domain::stateid::{StateId, StateType};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Callback invoked when a state is released.
pub type DisposeListener = Box<dyn FnMut(&StateId) -> Result<(), NfsError> + Send>;

struct StateInner {
    stateid: StateId,
    confirmed: bool,
    disposed: bool,
    listeners: VecDeque<DisposeListener>,
}

/// Server-held open, lock, layout, delegation or copy state.
pub struct NfsState {
    owner: Arc<StateOwner>,
    parent: Option<Arc<NfsState>>,
    inner: Mutex<StateInner>,
    /// Held for the whole of a disposal attempt.
    disposing: Mutex<()>,
}

impl NfsState {
    pub fn new(stateid: StateId, owner: Arc<StateOwner>, parent: Option<Arc<NfsState>>) -> Self {
        Self {
            owner,
            parent,
            inner: Mutex::new(StateInner {
                stateid,
                confirmed: false,
                disposed: false,
                listeners: VecDeque::new(),
            }),
            disposing: Mutex::new(()),
        }
    }

    /// Snapshot of the current state id.
    pub fn stateid(&self) -> StateId {
        self.inner.lock().stateid
    }

    pub fn state_type(&self) -> Option<StateType> {
        self.inner.lock().stateid.state_type()
    }

    pub fn owner(&self) -> &Arc<StateOwner> {
        &self.owner
    }

    /// The open this state was derived from, or the state itself.
    pub fn open_state(self: &Arc<Self>) -> Arc<NfsState> {
        match &self.parent {
            Some(parent) => parent.clone(),
            None => self.clone(),
        }
    }

    pub fn parent(&self) -> Option<&Arc<NfsState>> {
        self.parent.as_ref()
    }

    pub fn confirm(&self) {
        self.inner.lock().confirmed = true;
    }

    pub fn is_confirmed(&self) -> bool {
        self.inner.lock().confirmed
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Advance the embedded seqid and return the new state id.
    ///
    /// Zero is reserved for "current", so the seqid wraps to one.
    pub fn bump_seqid(&self) -> StateId {
        let mut inner = self.inner.lock();
        inner.stateid.seqid = match inner.stateid.seqid.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        inner.stateid
    }

    pub fn add_dispose_listener(&self, listener: DisposeListener) {
        self.inner.lock().listeners.push_back(listener);
    }

    /// Release the state, aborting on the first listener failure.
    pub fn try_dispose(&self) -> Result<(), NfsError> {
        let _disposing = self.disposing.lock();
        let (stateid, mut listeners) = match self.take_listeners() {
            Some(taken) => taken,
            None => return Ok(()),
        };

        while let Some(mut listener) = listeners.pop_front() {
            if let Err(e) = listener(&stateid) {
                listeners.push_front(listener);
                let mut inner = self.inner.lock();
                // listeners registered while we were running go after the pending ones
                listeners.extend(inner.listeners.drain(..));
                inner.listeners = listeners;
                return Err(e);
            }
        }

        self.mark_disposed();
        Ok(())
    }

    /// Release the state, logging and skipping failed listeners.
    pub fn dispose_ignore_failures(&self) {
        let _disposing = self.disposing.lock();
        let (stateid, listeners) = match self.take_listeners() {
            Some(taken) => taken,
            None => return,
        };

        for mut listener in listeners {
            if let Err(e) = listener(&stateid) {
                warn!(state = %stateid, error = %e, "Dispose listener failed, continuing");
            }
        }

        self.mark_disposed();
    }

    fn take_listeners(&self) -> Option<(StateId, VecDeque<DisposeListener>)> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return None;
        }
        Some((inner.stateid, std::mem::take(&mut inner.listeners)))
    }

    fn mark_disposed(&self) {
        let mut inner = self.inner.lock();
        inner.disposed = true;
        // late registrations can never run; drop them with the state
        inner.listeners.clear();
    }
}

impl std::fmt::Debug for NfsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("NfsState")
            .field("stateid", &inner.stateid)
            .field("confirmed", &inner.confirmed)
            .field("disposed", &inner.disposed)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
