// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod byte_range_locks;
pub mod client_registry;
pub mod file_tracker;
pub mod lifecycle;

pub use byte_range_locks::{LockRequest, LockService, Locker};
pub use client_registry::{ClientRegistry, RegisterOutcome, SequenceOutcome};
pub use file_tracker::FileTracker;
