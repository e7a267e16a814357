// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod lock_manager;
pub mod recovery;
pub mod striped;
