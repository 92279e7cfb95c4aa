//! Manager Configuration
//!
//! One explicit configuration value, built at process start and handed to
//! every component that needs it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Constants
// =============================================================================

/// Default SPDK RPC socket
pub const DEFAULT_SOCKET_PATH: &str = "/var/tmp/spdk_tgt.sock";

/// Default per-call RPC timeout
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 30_000;

/// Out-of-band NVMe discovery probe
pub const DEFAULT_DISCOVERY_TOOL: &str = "/usr/bin/nvme_discover_json";

/// Discovery probe timeout
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// RPC Configuration
// =============================================================================

/// Engine transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Unix socket the engine listens on
    pub socket_path: PathBuf,
    /// Default per-call timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// =============================================================================
// Discovery Configuration
// =============================================================================

/// Out-of-band discovery probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Path to the discovery executable
    pub tool_path: PathBuf,
    /// Probe timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            tool_path: PathBuf::from(DEFAULT_DISCOVERY_TOOL),
            timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// =============================================================================
// System Configuration
// =============================================================================

/// Host tools and pseudo filesystems consulted by the collectors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Path to sysfs (for testing)
    pub sysfs_path: PathBuf,
    /// Live mount table
    pub mount_table: PathBuf,
    /// lsblk executable
    pub lsblk: String,
    /// nvme-cli executable
    pub nvme_cli: String,
    /// smartctl executable
    pub smartctl: String,
    /// Timeout for lsblk / nvme-cli / smartctl invocations in milliseconds
    pub command_timeout_ms: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            sysfs_path: PathBuf::from("/sys"),
            mount_table: PathBuf::from("/proc/self/mounts"),
            lsblk: "lsblk".to_string(),
            nvme_cli: "nvme".to_string(),
            smartctl: "smartctl".to_string(),
            command_timeout_ms: 15_000,
        }
    }
}

impl SystemConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

// =============================================================================
// Manager Configuration
// =============================================================================

/// Complete manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub rpc: RpcConfig,
    pub discovery: DiscoveryConfig,
    pub system: SystemConfig,
}

impl ManagerConfig {
    /// Load configuration from a YAML file; absent keys keep their defaults
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: ManagerConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the components cannot work with
    pub fn validate(&self) -> Result<()> {
        if !self.rpc.socket_path.is_absolute() {
            return Err(Error::Configuration(format!(
                "Socket path must be an absolute path: {}",
                self.rpc.socket_path.display()
            )));
        }
        if self.rpc.timeout_ms == 0 {
            return Err(Error::Configuration("RPC timeout must be non-zero".into()));
        }
        if self.discovery.timeout_ms == 0 {
            return Err(Error::Configuration(
                "Discovery timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
