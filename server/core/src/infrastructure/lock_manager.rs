// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process byte-range lock manager.
//!
//! Locks are kept per file as a list of non-overlapping ranges per owner.
//! Requests on the same file are serialized by a lock stripe. A new lock by
//! an owner replaces whatever that owner held in the range (upgrade or
//! downgrade); an unlock may split a held range in two.

use crate::domain::file_store::FileId;
use crate::domain::lock_manager::{ByteRangeLock, LockError, LockManager, LOCK_TO_EOF};
use crate::infrastructure::striped::StripedLock;
use dashmap::DashMap;

pub struct SimpleLockManager {
    stripes: StripedLock,
    files: DashMap<FileId, Vec<ByteRangeLock>>,
}

impl SimpleLockManager {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: StripedLock::new(stripes),
            files: DashMap::new(),
        }
    }

    /// Locks currently held on `file`.
    pub fn locks(&self, file: &FileId) -> Vec<ByteRangeLock> {
        self.files
            .get(file)
            .map(|locks| locks.clone())
            .unwrap_or_default()
    }

    fn find_conflict(&self, file: &FileId, lock: &ByteRangeLock) -> Option<ByteRangeLock> {
        self.files
            .get(file)
            .and_then(|held| held.iter().find(|h| lock.conflicts_with(h)).cloned())
    }
}

/// The parts of `held` left after removing the range of `range`.
fn subtract(held: &ByteRangeLock, range: &ByteRangeLock) -> Vec<ByteRangeLock> {
    if !held.overlaps(range) {
        return vec![held.clone()];
    }

    let mut rest = Vec::with_capacity(2);
    if held.offset < range.offset {
        rest.push(ByteRangeLock::new(
            held.owner.clone(),
            held.lock_type,
            held.offset,
            range.offset - held.offset,
        ));
    }
    if range.end() < held.end() {
        let length = if held.length == LOCK_TO_EOF {
            LOCK_TO_EOF
        } else {
            held.end() - range.end()
        };
        rest.push(ByteRangeLock::new(
            held.owner.clone(),
            held.lock_type,
            range.end(),
            length,
        ));
    }
    rest
}

impl LockManager for SimpleLockManager {
    fn lock(&self, file: &FileId, lock: ByteRangeLock) -> Result<(), LockError> {
        let _stripe = self.stripes.lock(file);

        if let Some(conflicting) = self.find_conflict(file, &lock) {
            return Err(LockError::Denied { conflicting });
        }

        let mut held = self.files.entry(file.clone()).or_default();
        let mut merged: Vec<ByteRangeLock> = Vec::with_capacity(held.len() + 1);
        for existing in held.drain(..) {
            if existing.is_same_owner(&lock) {
                merged.extend(subtract(&existing, &lock));
            } else {
                merged.push(existing);
            }
        }
        merged.push(lock);
        *held = merged;
        Ok(())
    }

    fn unlock(&self, file: &FileId, lock: &ByteRangeLock) -> Result<(), LockError> {
        let _stripe = self.stripes.lock(file);

        {
            let mut held = self
                .files
                .get_mut(file)
                .ok_or_else(|| LockError::RangeUnavailable(lock.clone()))?;

            if !held.iter().any(|h| h.is_same_owner(lock) && h.overlaps(lock)) {
                return Err(LockError::RangeUnavailable(lock.clone()));
            }

            let mut remaining = Vec::with_capacity(held.len() + 1);
            for existing in held.drain(..) {
                if existing.is_same_owner(lock) {
                    remaining.extend(subtract(&existing, lock));
                } else {
                    remaining.push(existing);
                }
            }
            *held = remaining;
        }

        self.files.remove_if(file, |_, held| held.is_empty());
        Ok(())
    }

    fn test(&self, file: &FileId, lock: &ByteRangeLock) -> Result<(), LockError> {
        let _stripe = self.stripes.lock(file);
        match self.find_conflict(file, lock) {
            Some(conflicting) => Err(LockError::Denied { conflicting }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lock_manager::{LockOwner, LockType};

    fn file() -> FileId {
        FileId::new(b"inode-7".to_vec())
    }

    fn lock(client: u64, lock_type: LockType, offset: u64, length: u64) -> ByteRangeLock {
        ByteRangeLock::new(LockOwner::new(client, b"lo".to_vec()), lock_type, offset, length)
    }

    #[test]
    fn test_shared_and_exclusive() {
        let manager = SimpleLockManager::new(8);
        manager.lock(&file(), lock(1, LockType::Read, 0, 100)).unwrap();
        manager.lock(&file(), lock(2, LockType::Read, 50, 100)).unwrap();

        match manager.lock(&file(), lock(3, LockType::Write, 90, 5)) {
            Err(LockError::Denied { conflicting }) => assert!(conflicting.owner.client_id < 3),
            other => panic!("unexpected {other:?}"),
        }
        manager.lock(&file(), lock(3, LockType::Write, 150, LOCK_TO_EOF)).unwrap();
    }

    #[test]
    fn test_unlock_splits_range() {
        let manager = SimpleLockManager::new(8);
        manager.lock(&file(), lock(1, LockType::Write, 0, 100)).unwrap();
        manager.unlock(&file(), &lock(1, LockType::Write, 40, 20)).unwrap();

        let mut held = manager.locks(&file());
        held.sort_by_key(|l| l.offset);
        assert_eq!(held.len(), 2);
        assert_eq!((held[0].offset, held[0].length), (0, 40));
        assert_eq!((held[1].offset, held[1].length), (60, 40));

        manager.lock(&file(), lock(2, LockType::Write, 45, 10)).unwrap();
        assert!(manager.test(&file(), &lock(2, LockType::Read, 30, 5)).is_err());
    }

    #[test]
    fn test_unlock_not_held() {
        let manager = SimpleLockManager::new(8);
        assert!(matches!(
            manager.unlock(&file(), &lock(1, LockType::Read, 0, 1)),
            Err(LockError::RangeUnavailable(_))
        ));
        manager.unlock_if_exists(&file(), &lock(1, LockType::Read, 0, 1)).unwrap();
    }

    #[test]
    fn test_same_owner_upgrade_replaces_range() {
        let manager = SimpleLockManager::new(8);
        manager.lock(&file(), lock(1, LockType::Read, 0, LOCK_TO_EOF)).unwrap();
        manager.lock(&file(), lock(1, LockType::Write, 10, 10)).unwrap();

        let held = manager.locks(&file());
        assert_eq!(held.len(), 3);
        assert!(manager.test(&file(), &lock(2, LockType::Read, 12, 1)).is_err());
        manager.test(&file(), &lock(2, LockType::Read, 0, 10)).unwrap();

        manager.unlock(&file(), &lock(1, LockType::Read, 0, LOCK_TO_EOF)).unwrap();
        assert!(manager.locks(&file()).is_empty());
    }
}
