// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// State Core Configuration
//
// Defines the tunables of the client/session/state core:
// - Lease and grace period timing
// - Session limits (slots, operations per compound)
// - Registry instance identity (embedded into client ids)
// - Recovery store backend
// - Lock striping
//
// Loaded from YAML with environment overrides, following the same discovery
// order as the rest of the node configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Recovery store backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum RecoveryConfig {
    /// Nothing survives a restart; the server never enters a grace period.
    Ephemeral,
    /// sled database directory.
    Sled { path: PathBuf },
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self::Ephemeral
    }
}

/// Configuration of the state core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Client lease time
    #[serde(with = "humantime_serde", default = "default_lease_time")]
    pub lease_time: Duration,

    /// Recovery grace period; defaults to the lease time
    #[serde(with = "humantime_serde", default, skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<Duration>,

    /// Upper bound for slots per session
    #[serde(default = "default_max_slots")]
    pub max_slots: u32,

    /// Upper bound for operations per fore channel compound
    #[serde(default = "default_max_operations")]
    pub max_operations: u32,

    /// Upper bound for operations per callback compound
    #[serde(default = "default_max_cb_operations")]
    pub max_cb_operations: u32,

    /// Distinguishes registries started within the same second
    #[serde(default)]
    pub instance_id: u8,

    /// Expected number of concurrent request workers; sizes lock striping
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Recovery store backend
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_lease_time() -> Duration {
    Duration::from_secs(90)
}

fn default_max_slots() -> u32 {
    128
}

fn default_max_operations() -> u32 {
    128
}

fn default_max_cb_operations() -> u32 {
    16
}

fn default_worker_threads() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            lease_time: default_lease_time(),
            grace_period: None,
            max_slots: default_max_slots(),
            max_operations: default_max_operations(),
            max_cb_operations: default_max_cb_operations(),
            instance_id: 0,
            worker_threads: default_worker_threads(),
            recovery: RecoveryConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl StateConfig {
    /// Effective grace period.
    pub fn grace_period(&self) -> Duration {
        self.grace_period.unwrap_or(self.lease_time)
    }

    /// Period of the dead-client sweep.
    pub fn sweep_interval(&self) -> Duration {
        self.lease_time * 4
    }

    /// Number of lock stripes: four per worker, rounded to a power of two.
    pub fn lock_stripes(&self) -> usize {
        (self.worker_threads.max(1) * 4).next_power_of_two()
    }

    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. NFS4D_CONFIG_PATH environment variable
    /// 2. ./nfs4d.yaml (working directory)
    /// 3. ~/.nfs4d/config.yaml (user home)
    /// 4. /etc/nfs4d/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("NFS4D_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./nfs4d.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".nfs4d").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/nfs4d/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NFS4D_LEASE_TIME") {
            match humantime::parse_duration(&val) {
                Ok(lease) => {
                    tracing::info!("Environment override: NFS4D_LEASE_TIME={}", val);
                    self.lease_time = lease;
                }
                Err(e) => {
                    tracing::warn!("Invalid value for NFS4D_LEASE_TIME: '{}' ({}). Ignoring.", val, e);
                }
            }
        }

        if let Ok(val) = std::env::var("NFS4D_INSTANCE_ID") {
            match val.parse::<u8>() {
                Ok(id) => {
                    tracing::info!("Environment override: NFS4D_INSTANCE_ID={}", id);
                    self.instance_id = id;
                }
                Err(_) => {
                    tracing::warn!("Invalid value for NFS4D_INSTANCE_ID: '{}'. Expected 0-255. Ignoring.", val);
                }
            }
        }

        if let Ok(val) = std::env::var("NFS4D_RECOVERY_PATH") {
            tracing::info!("Environment override: NFS4D_RECOVERY_PATH={}", val);
            self.recovery = RecoveryConfig::Sled { path: PathBuf::from(val) };
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lease_time.is_zero() {
            anyhow::bail!("lease_time must be greater than zero");
        }

        if self.grace_period() < self.lease_time {
            anyhow::bail!(
                "grace_period ({:?}) must not be shorter than lease_time ({:?})",
                self.grace_period(),
                self.lease_time
            );
        }

        if self.max_slots == 0 {
            anyhow::bail!("max_slots must be at least 1");
        }

        if self.max_operations < 2 {
            anyhow::bail!("max_operations must allow at least SEQUENCE plus one operation");
        }

        if let RecoveryConfig::Sled { path } = &self.recovery {
            if path.as_os_str().is_empty() {
                anyhow::bail!("recovery.path cannot be empty");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StateConfig::default();
        assert_eq!(config.lease_time, Duration::from_secs(90));
        assert_eq!(config.grace_period(), config.lease_time);
        assert_eq!(config.sweep_interval(), Duration::from_secs(360));
        assert_eq!(config.lock_stripes(), 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
lease_time: 30s
grace_period: 1m
max_slots: 16
instance_id: 7
worker_threads: 3
recovery:
  backend: sled
  path: /var/lib/nfs4d/clients
"#;
        let config = StateConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.lease_time, Duration::from_secs(30));
        assert_eq!(config.grace_period(), Duration::from_secs(60));
        assert_eq!(config.max_slots, 16);
        assert_eq!(config.max_operations, 128);
        assert_eq!(config.instance_id, 7);
        assert_eq!(config.lock_stripes(), 16);
        assert_eq!(
            config.recovery,
            RecoveryConfig::Sled {
                path: PathBuf::from("/var/lib/nfs4d/clients")
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = StateConfig::default();
        let yaml = config.to_yaml_string().unwrap();
        let parsed = StateConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.lease_time, config.lease_time);
        assert_eq!(parsed.recovery, config.recovery);
    }

    #[test]
    fn test_validation() {
        let mut config = StateConfig {
            grace_period: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.grace_period = None;
        config.max_slots = 0;
        assert!(config.validate().is_err());

        config.max_slots = 1;
        config.lease_time = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
