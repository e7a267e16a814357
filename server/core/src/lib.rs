// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! nfs4d core
//!
//! Client, session and state machinery of an NFSv4.0/4.1/4.2 server:
//! client registration and leases, sessions with exactly-once slot replay,
//! share reservations, state id lifecycle, byte-range locks and grace period
//! recovery after a restart.
//!
//! # Architecture
//!
//! - **domain:** identifiers, client/session/state records, contracts of
//!   the file store, lock manager and recovery store
//! - **application:** client registry, file tracker, lock service and the
//!   registry's background tasks
//! - **infrastructure:** recovery store and lock manager implementations

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::client_registry::{ClientRegistry, RegisterOutcome, SequenceOutcome};
pub use application::file_tracker::FileTracker;
pub use domain::config::StateConfig;
pub use domain::errors::{ErrorKind, NfsError};
