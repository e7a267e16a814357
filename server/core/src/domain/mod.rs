// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Client, session and state model of the NFSv4 server core, and the
//! contracts of the collaborators it consumes.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** State model and collaborator contracts

pub mod errors;
pub mod stateid;
pub mod owner;
pub mod state;
pub mod slot;
pub mod session;
pub mod client;
pub mod share;
pub mod config;
pub mod file_store;
pub mod lock_manager;
pub mod recovery;
