// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Share reservation bits (`OPEN4_SHARE_ACCESS_*`, `OPEN4_SHARE_DENY_*`).

pub const SHARE_ACCESS_READ: u32 = 0x0000_0001;
pub const SHARE_ACCESS_WRITE: u32 = 0x0000_0002;
pub const SHARE_ACCESS_BOTH: u32 = 0x0000_0003;

/// Low bits carrying the access mode; the rest are NFSv4.1 delegation wants.
pub const SHARE_ACCESS_MASK: u32 = 0x0000_00ff;
pub const SHARE_WANT_DELEG_MASK: u32 = 0x0000_ff00;

pub const SHARE_DENY_NONE: u32 = 0x0000_0000;
pub const SHARE_DENY_READ: u32 = 0x0000_0001;
pub const SHARE_DENY_WRITE: u32 = 0x0000_0002;
pub const SHARE_DENY_BOTH: u32 = 0x0000_0003;

/// Access and deny modes of one share reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShareMode {
    pub access: u32,
    pub deny: u32,
}

impl ShareMode {
    /// Build a mode from raw OPEN arguments, dropping delegation want bits.
    pub fn new(access: u32, deny: u32) -> Self {
        Self {
            access: access & SHARE_ACCESS_MASK,
            deny,
        }
    }

    /// Whether two reservations on the same file may coexist.
    pub fn conflicts_with(&self, other: &ShareMode) -> bool {
        (self.access & other.deny) != 0 || (self.deny & other.access) != 0
    }

    pub fn is_subset_of(&self, other: &ShareMode) -> bool {
        (self.access & !other.access) == 0 && (self.deny & !other.deny) == 0
    }
}

/// Bit recording that the exact mode value `mode` was granted.
pub fn seen_bit(mode: u32) -> u32 {
    1u32.checked_shl(mode).unwrap_or(0)
}
