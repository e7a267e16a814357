// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registry Lifecycle - Background lease sweep and grace timer
//!
//! Two tasks owned by the client registry:
//!
//! - a periodic sweep (every 4× lease time) evicting clients whose lease
//!   expired
//! - a one-shot timer closing the recovery grace period after the configured
//!   grace time, unless every expected client reclaimed earlier
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Runs the registry's time driven housekeeping
//!
//! Both tasks hold a `Weak` reference to the registry and stop when it is
//! dropped or when the shutdown token is cancelled.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::client_registry::ClientRegistry;

pub struct RegistryLifecycle {
    shutdown_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RegistryLifecycle {
    pub fn new() -> Self {
        Self {
            shutdown_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawn the sweep and grace timer for `registry`.
    pub fn start(&self, registry: &Arc<ClientRegistry>) {
        let sweep_interval = registry.config().sweep_interval();
        let grace_period = registry.config().grace_period();

        let sweeper = tokio::spawn(run_lease_sweeper(
            Arc::downgrade(registry),
            sweep_interval,
            self.shutdown_token.clone(),
        ));
        let grace_timer = tokio::spawn(run_grace_timer(
            Arc::downgrade(registry),
            grace_period,
            self.shutdown_token.clone(),
        ));

        self.tasks.lock().extend([sweeper, grace_timer]);
    }

    /// Cancel both tasks. Does not wait for them to finish.
    pub fn stop(&self) {
        self.shutdown_token.cancel();
        self.tasks.lock().clear();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }
}

impl Default for RegistryLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_lease_sweeper(
    registry: Weak<ClientRegistry>,
    period: Duration,
    shutdown_token: CancellationToken,
) {
    info!(period = ?period, "Starting lease sweeper background task");

    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let Some(registry) = registry.upgrade() else {
                    break;
                };

                debug!("Running lease sweep");
                let evicted = registry.sweep_expired_clients();
                if evicted > 0 {
                    info!(evicted, "Lease sweep evicted expired clients");
                }
            }
            _ = shutdown_token.cancelled() => {
                info!("Shutdown signal received, stopping lease sweeper");
                break;
            }
        }
    }

    info!("Lease sweeper background task stopped");
}

async fn run_grace_timer(
    registry: Weak<ClientRegistry>,
    grace_period: Duration,
    shutdown_token: CancellationToken,
) {
    tokio::select! {
        _ = sleep(grace_period) => {
            let Some(registry) = registry.upgrade() else {
                return;
            };

            if let Err(e) = registry.end_grace_period() {
                warn!("Failed to end grace period: {}", e);
            }
        }
        _ = shutdown_token.cancelled() => {
            debug!("Shutdown signal received, grace timer cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::client::ClientRegistration;
    use crate::domain::config::StateConfig;
    use crate::domain::recovery::RecoveryStore;
    use crate::domain::stateid::Verifier;
    use crate::infrastructure::recovery::EphemeralRecoveryStore;

    fn config() -> StateConfig {
        StateConfig {
            lease_time: Duration::from_secs(10),
            ..Default::default()
        }
    }

    fn registration() -> ClientRegistration {
        ClientRegistration {
            owner: b"host-a".to_vec(),
            verifier: Verifier([1; 8]),
            principal: "alice".to_string(),
            client_address: "10.1.1.2:900".parse().unwrap(),
            local_address: "10.1.1.1:2049".parse().unwrap(),
            minor_version: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_after_four_leases() {
        let store: Arc<dyn RecoveryStore> = Arc::new(EphemeralRecoveryStore::new());
        let registry = ClientRegistry::launch(config(), store);
        let client = registry.create_client(registration()).unwrap();

        tokio::time::sleep(Duration::from_secs(39)).await;
        assert!(!client.is_lease_valid());
        assert!(!client.is_disposed());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(client.is_disposed());
        assert!(registry.clients().unwrap().is_empty());

        registry.shutdown().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_tasks() {
        let store: Arc<dyn RecoveryStore> = Arc::new(EphemeralRecoveryStore::new());
        let registry = ClientRegistry::launch(config(), store);
        let client = registry.create_client(registration()).unwrap();

        registry.shutdown().unwrap();
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(!registry.is_running());
        assert!(client.is_disposed());
    }

    #[test]
    fn test_stop_cancels_token() {
        let lifecycle = RegistryLifecycle::new();
        let token = lifecycle.shutdown_token();
        lifecycle.stop();
        assert!(token.is_cancelled());
        assert!(lifecycle.is_stopped());
    }
}
