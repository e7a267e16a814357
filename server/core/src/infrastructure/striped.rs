// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Striped mutex set.
//!
//! A fixed array of mutexes selected by the hash of a key. Keys that hash to
//! different stripes never contend; the stripe count is rounded up to a power
//! of two so selection is a mask.

use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub struct StripedLock {
    stripes: Box<[Mutex<()>]>,
    mask: usize,
}

impl StripedLock {
    pub fn new(stripes: usize) -> Self {
        let count = stripes.max(1).next_power_of_two();
        Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
            mask: count - 1,
        }
    }

    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }

    pub fn index_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & self.mask
    }

    /// Lock the stripe guarding `key`.
    pub fn lock<K: Hash + ?Sized>(&self, key: &K) -> MutexGuard<'_, ()> {
        self.stripes[self.index_of(key)].lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stripe_count_is_power_of_two() {
        assert_eq!(StripedLock::new(0).stripes(), 1);
        assert_eq!(StripedLock::new(12).stripes(), 16);
        assert_eq!(StripedLock::new(64).stripes(), 64);
    }

    #[test]
    fn test_same_key_same_stripe() {
        let lock = StripedLock::new(32);
        assert_eq!(lock.index_of(b"file-a".as_slice()), lock.index_of(b"file-a".as_slice()));
        assert!(lock.index_of(b"file-a".as_slice()) < 32);
    }

    #[test]
    fn test_different_stripes_do_not_contend() {
        let lock = StripedLock::new(1024);
        let a = (0u32..).find(|k| lock.index_of(k) != lock.index_of(&0u32)).unwrap();
        let _first = lock.lock(&0u32);
        assert!(lock.stripes[lock.index_of(&a)].try_lock().is_some());
    }
}
