// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Session slot: one entry of the NFSv4.1 reply cache.

use crate::domain::errors::NfsError;
use bytes::Bytes;
use tracing::debug;

/// Result of presenting a sequence id to a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotAcquire {
    /// New request; execute it.
    Execute,
    /// Retransmission of a request whose reply was cached.
    Replay(Bytes),
    /// Retransmission received before any reply was cached. The caller must
    /// reject the request.
    ReplayUncached,
}

/// Exactly-once replay slot.
#[derive(Debug)]
pub struct SessionSlot {
    id: u32,
    sequence: u32,
    reply: Option<Bytes>,
}

impl SessionSlot {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            sequence: 0,
            reply: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Last accepted sequence id.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn acquire(&mut self, sequence: u32) -> Result<SlotAcquire, NfsError> {
        if sequence == self.sequence {
            debug!(slot = self.id, sequence, "Retransmit detected");
            return Ok(match &self.reply {
                Some(reply) => SlotAcquire::Replay(reply.clone()),
                None => SlotAcquire::ReplayUncached,
            });
        }

        let expected = self.sequence.wrapping_add(1);
        if sequence != expected {
            return Err(NfsError::SeqMisordered {
                expected,
                given: sequence,
            });
        }

        self.sequence = sequence;
        self.reply = None;
        Ok(SlotAcquire::Execute)
    }

    /// Cache the reply of the request currently holding this slot.
    pub fn update(&mut self, reply: Bytes) {
        self.reply = Some(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_returns_cached_reply() {
        let mut slot = SessionSlot::new(0);
        for n in 1..5u32 {
            assert_eq!(slot.acquire(n).unwrap(), SlotAcquire::Execute);
            let reply = Bytes::from(format!("reply-{n}"));
            slot.update(reply.clone());
            assert_eq!(slot.acquire(n).unwrap(), SlotAcquire::Replay(reply.clone()));
            assert_eq!(slot.acquire(n).unwrap(), SlotAcquire::Replay(reply));
        }
    }

    #[test]
    fn test_gap_is_misordered_and_leaves_slot_untouched() {
        let mut slot = SessionSlot::new(3);
        slot.acquire(1).unwrap();
        slot.update(Bytes::from_static(b"one"));

        assert!(matches!(
            slot.acquire(3),
            Err(NfsError::SeqMisordered { expected: 2, given: 3 })
        ));
        assert_eq!(slot.sequence(), 1);
        assert_eq!(
            slot.acquire(1).unwrap(),
            SlotAcquire::Replay(Bytes::from_static(b"one"))
        );
    }

    #[test]
    fn test_retransmit_before_reply() {
        let mut slot = SessionSlot::new(0);
        slot.acquire(1).unwrap();
        assert_eq!(slot.acquire(1).unwrap(), SlotAcquire::ReplayUncached);
    }

    #[test]
    fn test_new_request_clears_cached_reply() {
        let mut slot = SessionSlot::new(0);
        slot.acquire(1).unwrap();
        slot.update(Bytes::from_static(b"one"));
        slot.acquire(2).unwrap();
        assert_eq!(slot.acquire(2).unwrap(), SlotAcquire::ReplayUncached);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut slot = SessionSlot::new(0);
        slot.sequence = u32::MAX;
        assert_eq!(slot.acquire(0).unwrap(), SlotAcquire::Execute);
    }
}
