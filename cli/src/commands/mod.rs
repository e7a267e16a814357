// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the nfs4d CLI

pub mod config;
pub mod recovery;
pub mod run;

pub use self::config::ConfigCommand;
pub use self::recovery::RecoveryCommand;
