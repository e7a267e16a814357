// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Byte-range lock manager contract.
//!
//! The state core decides *who* may lock (lock states, open modes, seqids);
//! the lock manager decides whether a range is free. A denial always carries
//! the conflicting lock so LOCK and LOCKT can report the holder.

use crate::domain::file_store::FileId;
use thiserror::Error;

/// Length value meaning "to end of file".
pub const LOCK_TO_EOF: u64 = u64::MAX;

/// Lock type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    Read,
    Write,
}

/// Owner of a byte-range lock: the client plus the opaque lock-owner bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockOwner {
    pub client_id: u64,
    pub owner: Vec<u8>,
}

impl LockOwner {
    pub fn new(client_id: u64, owner: Vec<u8>) -> Self {
        Self { client_id, owner }
    }
}

/// A byte-range lock request or grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ByteRangeLock {
    pub owner: LockOwner,
    pub lock_type: LockType,
    pub offset: u64,
    /// Number of bytes; [`LOCK_TO_EOF`] locks to the end of file.
    pub length: u64,
}

impl ByteRangeLock {
    pub fn new(owner: LockOwner, lock_type: LockType, offset: u64, length: u64) -> Self {
        Self {
            owner,
            lock_type,
            offset,
            length,
        }
    }

    /// Exclusive end offset, saturating at `u64::MAX`.
    pub fn end(&self) -> u64 {
        if self.length == LOCK_TO_EOF {
            u64::MAX
        } else {
            self.offset.saturating_add(self.length)
        }
    }

    pub fn overlaps(&self, other: &ByteRangeLock) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    pub fn is_same_owner(&self, other: &ByteRangeLock) -> bool {
        self.owner == other.owner
    }

    /// Whether `other` held by someone else prevents granting `self`.
    pub fn conflicts_with(&self, other: &ByteRangeLock) -> bool {
        !self.is_same_owner(other)
            && self.overlaps(other)
            && (self.lock_type == LockType::Write || other.lock_type == LockType::Write)
    }
}

impl std::fmt::Display for ByteRangeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} lock [{}, {}) of client {:016x}",
            self.lock_type,
            self.offset,
            self.end(),
            self.owner.client_id
        )
    }
}

/// Lock manager errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock denied by {conflicting}")]
    Denied { conflicting: ByteRangeLock },

    #[error("Range not locked: {0}")]
    RangeUnavailable(ByteRangeLock),

    #[error("Lock manager failure: {0}")]
    Backend(String),
}

/// Byte-range lock manager keyed by file identity.
pub trait LockManager: Send + Sync {
    /// Acquire `lock` or fail with [`LockError::Denied`].
    fn lock(&self, file: &FileId, lock: ByteRangeLock) -> Result<(), LockError>;

    /// Release the range of `lock` held by its owner.
    fn unlock(&self, file: &FileId, lock: &ByteRangeLock) -> Result<(), LockError>;

    /// Check whether `lock` could be granted without acquiring it.
    fn test(&self, file: &FileId, lock: &ByteRangeLock) -> Result<(), LockError>;

    /// Release the range if held; never fails for ranges not held.
    fn unlock_if_exists(&self, file: &FileId, lock: &ByteRangeLock) -> Result<(), LockError> {
        match self.unlock(file, lock) {
            Err(LockError::RangeUnavailable(_)) => Ok(()),
            other => other,
        }
    }
}
