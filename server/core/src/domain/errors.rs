// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! State Core Errors
//!
//! Every operation exposed to the request-dispatch layer fails with an
//! [`NfsError`]. Each variant belongs to exactly one [`ErrorKind`] and maps to
//! one NFSv4 status code, so the dispatch layer never has to inspect the
//! failure of an underlying collaborator.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Error taxonomy of the state core

use crate::domain::file_store::FileStoreError;
use crate::domain::lock_manager::{ByteRangeLock, LockError};
use crate::domain::recovery::RecoveryStoreError;
use crate::domain::stateid::StateId;
use thiserror::Error;

/// NFSv4 status codes produced by the state core.
pub mod status {
    pub const NFS4ERR_PERM: u32 = 1;
    pub const NFS4ERR_NOENT: u32 = 2;
    pub const NFS4ERR_IO: u32 = 5;
    pub const NFS4ERR_ACCESS: u32 = 13;
    pub const NFS4ERR_EXIST: u32 = 17;
    pub const NFS4ERR_NOTDIR: u32 = 20;
    pub const NFS4ERR_ISDIR: u32 = 21;
    pub const NFS4ERR_INVAL: u32 = 22;
    pub const NFS4ERR_SERVERFAULT: u32 = 10006;
    pub const NFS4ERR_DELAY: u32 = 10008;
    pub const NFS4ERR_DENIED: u32 = 10010;
    pub const NFS4ERR_EXPIRED: u32 = 10011;
    pub const NFS4ERR_GRACE: u32 = 10013;
    pub const NFS4ERR_SHARE_DENIED: u32 = 10015;
    pub const NFS4ERR_CLID_INUSE: u32 = 10017;
    pub const NFS4ERR_STALE_CLIENTID: u32 = 10022;
    pub const NFS4ERR_STALE_STATEID: u32 = 10023;
    pub const NFS4ERR_OLD_STATEID: u32 = 10024;
    pub const NFS4ERR_BAD_STATEID: u32 = 10025;
    pub const NFS4ERR_BAD_SEQID: u32 = 10026;
    pub const NFS4ERR_LOCK_RANGE: u32 = 10028;
    pub const NFS4ERR_NO_GRACE: u32 = 10033;
    pub const NFS4ERR_RECLAIM_BAD: u32 = 10034;
    pub const NFS4ERR_OPENMODE: u32 = 10038;
    pub const NFS4ERR_BADSESSION: u32 = 10052;
    pub const NFS4ERR_BADSLOT: u32 = 10053;
    pub const NFS4ERR_COMPLETE_ALREADY: u32 = 10054;
    pub const NFS4ERR_CONN_NOT_BOUND_TO_SESSION: u32 = 10055;
    pub const NFS4ERR_SEQ_MISORDERED: u32 = 10063;
    pub const NFS4ERR_RETRY_UNCACHED_REP: u32 = 10068;
    pub const NFS4ERR_TOO_MANY_OPS: u32 = 10070;
}

/// Coarse classification of [`NfsError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Client id, session id or state id no longer known, or lease expired.
    /// Recoverable by re-registering.
    StaleIdentity,
    /// Slot or state-id sequence out of range. Never retried by the core.
    Sequence,
    /// Share reservation or byte-range lock conflict.
    Conflict,
    /// Request exceeds a negotiated or server limit. Rejected before mutation.
    Resource,
    /// Reclaim outside the grace period, or regular open during it.
    Grace,
    /// Malformed request arguments (illegal downgrade, wrong open mode).
    Invalid,
    /// Backing collaborator failure.
    Storage,
    /// Registry not running or invariant violation.
    Internal,
}

/// State core errors
#[derive(Debug, Error)]
pub enum NfsError {
    #[error("Stale client id: {0:016x}")]
    StaleClientId(u64),

    #[error("Lease of client {0:016x} expired")]
    Expired(u64),

    #[error("Unknown session")]
    BadSession,

    #[error("Bad state id: {0}")]
    BadStateId(StateId),

    #[error("State id {0} was issued by a previous server instance")]
    StaleStateId(StateId),

    #[error("Old state id: {given} (current seqid {current})")]
    OldStateId { given: StateId, current: u32 },

    #[error("Bad owner seqid: expected {expected}, got {given}")]
    BadSeqid { expected: u32, given: u32 },

    #[error("Misordered sequence: expected {expected}, got {given}")]
    SeqMisordered { expected: u32, given: u32 },

    #[error("Retransmission on slot {slot} with no cached reply")]
    RetryUncachedReply { slot: u32 },

    #[error("Slot {slot} out of range (highest slot {highest})")]
    BadSlot { slot: u32, highest: u32 },

    #[error("Share reservation conflict with open {holder} (access {access:#x}, deny {deny:#x})")]
    ShareDenied {
        holder: StateId,
        access: u32,
        deny: u32,
    },

    #[error("Byte-range lock denied, conflicting lock {conflicting}")]
    LockDenied { conflicting: ByteRangeLock },

    #[error("Lock range not held: {0}")]
    LockRange(String),

    #[error("Open mode does not permit requested operation")]
    OpenMode,

    #[error("Too many operations in compound: {requested} (max {max})")]
    TooManyOps { requested: u32, max: u32 },

    #[error("Invalid argument: {0}")]
    Inval(String),

    #[error("Server is in grace period")]
    Grace,

    #[error("Reclaim outside of grace period")]
    NoGrace,

    #[error("Reclaim not expected from this client")]
    ReclaimBad,

    #[error("Reclaim already completed")]
    CompleteAlready,

    #[error("Client owner already in use by another principal")]
    ClidInUse,

    #[error("Connection not bound to session")]
    ConnNotBoundToSession,

    #[error("Resource temporarily unavailable")]
    Delay,

    #[error("File store error: {0}")]
    FileStore(#[from] FileStoreError),

    #[error("Recovery store error: {0}")]
    Recovery(#[from] RecoveryStoreError),

    #[error("State handler is not running")]
    NotRunning,

    #[error("Server fault: {0}")]
    ServerFault(String),
}

impl NfsError {
    /// Taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StaleClientId(_)
            | Self::Expired(_)
            | Self::BadSession
            | Self::BadStateId(_)
            | Self::StaleStateId(_) => ErrorKind::StaleIdentity,
            Self::OldStateId { .. }
            | Self::BadSeqid { .. }
            | Self::SeqMisordered { .. }
            | Self::RetryUncachedReply { .. } => ErrorKind::Sequence,
            Self::ShareDenied { .. } | Self::LockDenied { .. } | Self::ClidInUse => {
                ErrorKind::Conflict
            }
            Self::BadSlot { .. } | Self::TooManyOps { .. } | Self::Delay => ErrorKind::Resource,
            Self::Grace | Self::NoGrace | Self::ReclaimBad | Self::CompleteAlready => {
                ErrorKind::Grace
            }
            Self::LockRange(_)
            | Self::OpenMode
            | Self::Inval(_)
            | Self::ConnNotBoundToSession => ErrorKind::Invalid,
            Self::FileStore(_) => ErrorKind::Storage,
            Self::Recovery(_) | Self::NotRunning | Self::ServerFault(_) => ErrorKind::Internal,
        }
    }

    /// NFSv4 status code for this error.
    pub fn status(&self) -> u32 {
        use status::*;
        match self {
            Self::StaleClientId(_) => NFS4ERR_STALE_CLIENTID,
            Self::Expired(_) => NFS4ERR_EXPIRED,
            Self::BadSession => NFS4ERR_BADSESSION,
            Self::BadStateId(_) => NFS4ERR_BAD_STATEID,
            Self::StaleStateId(_) => NFS4ERR_STALE_STATEID,
            Self::OldStateId { .. } => NFS4ERR_OLD_STATEID,
            Self::BadSeqid { .. } => NFS4ERR_BAD_SEQID,
            Self::SeqMisordered { .. } => NFS4ERR_SEQ_MISORDERED,
            Self::RetryUncachedReply { .. } => NFS4ERR_RETRY_UNCACHED_REP,
            Self::BadSlot { .. } => NFS4ERR_BADSLOT,
            Self::ShareDenied { .. } => NFS4ERR_SHARE_DENIED,
            Self::LockDenied { .. } => NFS4ERR_DENIED,
            Self::LockRange(_) => NFS4ERR_LOCK_RANGE,
            Self::OpenMode => NFS4ERR_OPENMODE,
            Self::TooManyOps { .. } => NFS4ERR_TOO_MANY_OPS,
            Self::Inval(_) => NFS4ERR_INVAL,
            Self::Grace => NFS4ERR_GRACE,
            Self::NoGrace => NFS4ERR_NO_GRACE,
            Self::ReclaimBad => NFS4ERR_RECLAIM_BAD,
            Self::CompleteAlready => NFS4ERR_COMPLETE_ALREADY,
            Self::ClidInUse => NFS4ERR_CLID_INUSE,
            Self::ConnNotBoundToSession => NFS4ERR_CONN_NOT_BOUND_TO_SESSION,
            Self::Delay => NFS4ERR_DELAY,
            Self::FileStore(e) => match e {
                FileStoreError::NotFound(_) => NFS4ERR_NOENT,
                FileStoreError::PermissionDenied(_) => NFS4ERR_ACCESS,
                FileStoreError::NotPermitted(_) => NFS4ERR_PERM,
                FileStoreError::Exists(_) => NFS4ERR_EXIST,
                FileStoreError::NotDirectory(_) => NFS4ERR_NOTDIR,
                FileStoreError::IsDirectory(_) => NFS4ERR_ISDIR,
                FileStoreError::Io(_) => NFS4ERR_IO,
            },
            Self::Recovery(_) | Self::NotRunning | Self::ServerFault(_) => NFS4ERR_SERVERFAULT,
        }
    }
}

impl From<LockError> for NfsError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Denied { conflicting } => Self::LockDenied { conflicting },
            LockError::RangeUnavailable(lock) => Self::LockRange(lock.to_string()),
            LockError::Backend(msg) => Self::ServerFault(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lock_manager::{LockOwner, LockType};

    #[test]
    fn test_kind_and_status_mapping() {
        let e = NfsError::SeqMisordered { expected: 2, given: 5 };
        assert_eq!(e.kind(), ErrorKind::Sequence);
        assert_eq!(e.status(), status::NFS4ERR_SEQ_MISORDERED);

        let e = NfsError::TooManyOps { requested: 20, max: 8 };
        assert_eq!(e.kind(), ErrorKind::Resource);

        assert_eq!(NfsError::NotRunning.kind(), ErrorKind::Internal);
        assert_eq!(NfsError::NotRunning.status(), status::NFS4ERR_SERVERFAULT);
        assert_eq!(NfsError::NoGrace.status(), status::NFS4ERR_NO_GRACE);
    }

    #[test]
    fn test_file_store_errors_stay_distinct() {
        let not_found: NfsError = FileStoreError::NotFound("a".into()).into();
        let denied: NfsError = FileStoreError::PermissionDenied("a".into()).into();
        let io: NfsError = FileStoreError::Io("disk".into()).into();
        assert_eq!(not_found.status(), status::NFS4ERR_NOENT);
        assert_eq!(denied.status(), status::NFS4ERR_ACCESS);
        assert_eq!(io.status(), status::NFS4ERR_IO);
        assert_eq!(io.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_lock_denial_carries_holder() {
        let holder = ByteRangeLock::new(LockOwner::new(7, b"owner".to_vec()), LockType::Write, 0, 10);
        let e: NfsError = LockError::Denied { conflicting: holder.clone() }.into();
        match e {
            NfsError::LockDenied { conflicting } => assert_eq!(conflicting, holder),
            other => panic!("unexpected {other:?}"),
        }
    }
}
