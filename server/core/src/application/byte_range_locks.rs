// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Byte-Range Lock Service
//!
//! LOCK, LOCKU and LOCKT on top of a [`LockManager`].
//!
//! A lock state is derived from the open state it was created from. The
//! open's share access decides which lock types are allowed, and disposing
//! the lock state (CLOSE, client teardown) releases every range its owner
//! still holds on the file.

use crate::application::client_registry::ClientRegistry;
use crate::domain::client::NfsClient;
use crate::domain::errors::NfsError;
use crate::domain::file_store::FileId;
use crate::domain::lock_manager::{ByteRangeLock, LockManager, LockOwner, LockType, LOCK_TO_EOF};
use crate::domain::share::{SHARE_ACCESS_READ, SHARE_ACCESS_WRITE};
use crate::domain::state::NfsState;
use crate::domain::stateid::{check_state_id, StateId, StateType};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the lock state of a LOCK request comes from (`locker4`).
#[derive(Debug, Clone)]
pub enum Locker {
    /// First lock of `lock_owner`, derived from an open state.
    NewOwner {
        open_stateid: StateId,
        open_seqid: u32,
        lock_owner: Vec<u8>,
        lock_seqid: u32,
    },
    /// Further lock by an owner that already has a lock state.
    Existing { lock_stateid: StateId, lock_seqid: u32 },
}

#[derive(Debug, Clone)]
pub struct LockRequest {
    pub lock_type: LockType,
    pub offset: u64,
    pub length: u64,
    pub reclaim: bool,
    pub locker: Locker,
}

pub struct LockService {
    registry: Arc<ClientRegistry>,
    lock_manager: Arc<dyn LockManager>,
}

fn check_range(offset: u64, length: u64) -> Result<(), NfsError> {
    if length == 0 {
        return Err(NfsError::Inval("lock length must not be zero".into()));
    }
    if length != LOCK_TO_EOF && offset.checked_add(length).is_none() {
        return Err(NfsError::Inval(format!(
            "lock range {offset}+{length} overflows"
        )));
    }
    Ok(())
}

impl LockService {
    pub fn new(registry: Arc<ClientRegistry>, lock_manager: Arc<dyn LockManager>) -> Self {
        Self {
            registry,
            lock_manager,
        }
    }

    fn renew_lease(client: &NfsClient) -> Result<(), NfsError> {
        if !client.is_session_based() {
            client.update_lease_time()?;
        }
        Ok(())
    }

    /// Open share access must cover the requested lock type.
    fn check_open_mode(
        &self,
        client: &NfsClient,
        file: &FileId,
        lock_state: &Arc<NfsState>,
        lock_type: LockType,
    ) -> Result<(), NfsError> {
        let open_state = lock_state.open_state();
        let access = self
            .registry
            .file_tracker()
            .get_share_access(client, file, &open_state.stateid())?;

        let required = match lock_type {
            LockType::Read => SHARE_ACCESS_READ,
            LockType::Write => SHARE_ACCESS_WRITE,
        };
        if access & required == 0 {
            return Err(NfsError::OpenMode);
        }
        Ok(())
    }

    /// Create the lock state of a new lock owner. Disposing it releases the
    /// owner's locks on `file`.
    fn new_lock_state(
        &self,
        client: &Arc<NfsClient>,
        file: &FileId,
        open_stateid: &StateId,
        open_seqid: u32,
        lock_owner: &[u8],
        lock_seqid: u32,
    ) -> Result<Arc<NfsState>, NfsError> {
        let open_state = client.state(open_stateid)?;
        check_state_id(&open_state.stateid(), open_stateid)?;
        open_state.owner().accept_as_next_seqid(open_seqid)?;

        let owner = client.get_or_create_owner(lock_owner, lock_seqid);
        let lock_state = client.create_state(owner, StateType::Lock, Some(open_state.clone()));

        let lock_manager = self.lock_manager.clone();
        let inode = file.clone();
        let everything = ByteRangeLock::new(
            LockOwner::new(client.id().0, lock_owner.to_vec()),
            LockType::Write,
            0,
            LOCK_TO_EOF,
        );
        lock_state.add_dispose_listener(Box::new(move |_: &StateId| {
            lock_manager
                .unlock_if_exists(&inode, &everything)
                .map_err(NfsError::from)
        }));

        // closing the open releases the lock state derived from it
        let child = Arc::downgrade(&lock_state);
        let holder = Arc::downgrade(client);
        open_state.add_dispose_listener(Box::new(move |_: &StateId| {
            let Some(lock_state) = child.upgrade() else {
                return Ok(());
            };
            lock_state.try_dispose()?;
            if let Some(client) = holder.upgrade() {
                client.detach_state(&lock_state.stateid());
            }
            Ok(())
        }));

        Ok(lock_state)
    }

    /// LOCK. Returns the lock state id with its seqid bumped.
    pub fn lock(
        &self,
        client: &Arc<NfsClient>,
        file: &FileId,
        request: LockRequest,
    ) -> Result<StateId, NfsError> {
        check_range(request.offset, request.length)?;
        self.registry.check_grace(client, request.reclaim)?;
        Self::renew_lease(client)?;

        let (lock_state, is_new) = match &request.locker {
            Locker::NewOwner {
                open_stateid,
                open_seqid,
                lock_owner,
                lock_seqid,
            } => {
                let state = self.new_lock_state(
                    client,
                    file,
                    open_stateid,
                    *open_seqid,
                    lock_owner,
                    *lock_seqid,
                )?;
                (state, true)
            }
            Locker::Existing {
                lock_stateid,
                lock_seqid,
            } => {
                let state = client.state(lock_stateid)?;
                check_state_id(&state.stateid(), lock_stateid)?;
                state.owner().accept_as_next_seqid(*lock_seqid)?;
                (state, false)
            }
        };

        let lock = ByteRangeLock::new(
            LockOwner::new(client.id().0, lock_state.owner().owner().to_vec()),
            request.lock_type,
            request.offset,
            request.length,
        );

        let result = self
            .check_open_mode(client, file, &lock_state, request.lock_type)
            .and_then(|_| self.lock_manager.lock(file, lock.clone()).map_err(NfsError::from));

        if let Err(e) = result {
            if is_new {
                if let Err(release) = client.release_state(&lock_state.stateid()) {
                    warn!(client = %client.id(), error = ?release, "Failed to release unused lock state");
                }
            }
            return Err(e);
        }

        let stateid = lock_state.bump_seqid();
        debug!(client = %client.id(), file = %file, lock = %lock, state = %stateid, "Lock granted");
        Ok(stateid)
    }

    /// LOCKU. Unlocking a range that is not held succeeds.
    #[allow(clippy::too_many_arguments)]
    pub fn unlock(
        &self,
        client: &Arc<NfsClient>,
        file: &FileId,
        lock_stateid: &StateId,
        seqid: u32,
        lock_type: LockType,
        offset: u64,
        length: u64,
    ) -> Result<StateId, NfsError> {
        check_range(offset, length)?;
        Self::renew_lease(client)?;

        let lock_state = client.state(lock_stateid)?;
        check_state_id(&lock_state.stateid(), lock_stateid)?;
        lock_state.owner().accept_as_next_seqid(seqid)?;

        let lock = ByteRangeLock::new(
            LockOwner::new(client.id().0, lock_state.owner().owner().to_vec()),
            lock_type,
            offset,
            length,
        );
        self.lock_manager.unlock_if_exists(file, &lock)?;

        let stateid = lock_state.bump_seqid();
        debug!(client = %client.id(), file = %file, lock = %lock, "Lock released");
        Ok(stateid)
    }

    /// LOCKT. Fails with the conflicting lock if the range is not free for
    /// `lock_owner`.
    pub fn test(
        &self,
        client: &NfsClient,
        file: &FileId,
        lock_owner: &[u8],
        lock_type: LockType,
        offset: u64,
        length: u64,
    ) -> Result<(), NfsError> {
        check_range(offset, length)?;
        Self::renew_lease(client)?;

        let lock = ByteRangeLock::new(
            LockOwner::new(client.id().0, lock_owner.to_vec()),
            lock_type,
            offset,
            length,
        );
        self.lock_manager.test(file, &lock)?;
        Ok(())
    }
}
