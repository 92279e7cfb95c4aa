//! Out-of-band NVMe Discovery Probe
//!
//! Runs the discovery executable, which walks the PCIe bus independently of
//! the kernel driver and therefore also sees controllers already handed to
//! user space.

use super::lenient;
use crate::config::DiscoveryConfig;
use crate::domain::ports::{CommandRunnerRef, SourceCollector};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

// =============================================================================
// Probe Output
// =============================================================================

/// One controller seen by the probe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredNvme {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub pcie_addr: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub vendor_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub subsystem_vendor_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub serial_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub model_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub firmware_version: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub total_capacity_bytes: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub total_capacity_gb: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub namespace_count: Option<u32>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub max_namespaces: Option<u32>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub transport_type: Option<String>,
}

/// Top-level probe document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryReport {
    #[serde(default)]
    pub nvme_devices: Vec<DiscoveredNvme>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub total_devices: Option<u64>,
    /// Unix timestamp of the scan
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timestamp: Option<u64>,
}

// =============================================================================
// Benign Failures
// =============================================================================

/// stderr fragment meaning "nothing to discover", not a failure
#[derive(Debug, Clone, Copy)]
pub struct BenignPattern {
    pub fragment: &'static str,
    pub meaning: &'static str,
}

/// Matched case-insensitively against the probe's stderr
pub const BENIGN_PATTERNS: &[BenignPattern] = &[
    BenignPattern {
        fragment: "cannot create lock on device",
        meaning: "devices locked by another process",
    },
    BenignPattern {
        fragment: "permission denied",
        meaning: "insufficient privileges for PCIe access",
    },
    BenignPattern {
        fragment: "no controllers found",
        meaning: "no NVMe controllers present",
    },
    BenignPattern {
        fragment: "no nvme controllers found",
        meaning: "no NVMe controllers present",
    },
];

/// First benign pattern contained in `stderr`
pub fn classify_stderr(stderr: &str) -> Option<&'static BenignPattern> {
    let lowered = stderr.to_lowercase();
    BENIGN_PATTERNS.iter().find(|p| lowered.contains(p.fragment))
}

// =============================================================================
// Collector
// =============================================================================

/// Collects controllers from the discovery probe
pub struct DiscoveryToolCollector {
    runner: CommandRunnerRef,
    tool_path: PathBuf,
    timeout: Duration,
}

impl DiscoveryToolCollector {
    pub fn new(runner: CommandRunnerRef, config: &DiscoveryConfig) -> Self {
        Self {
            runner,
            tool_path: config.tool_path.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl SourceCollector for DiscoveryToolCollector {
    type Record = DiscoveredNvme;

    fn name(&self) -> &'static str {
        "discovery"
    }

    async fn collect(&self) -> Result<Vec<DiscoveredNvme>> {
        let program = self.tool_path.to_string_lossy();
        let output = self.runner.run(&program, &[], self.timeout).await?;

        if !output.success() {
            if let Some(pattern) = classify_stderr(&output.stderr) {
                info!("NVMe discovery found nothing: {}", pattern.meaning);
                return Ok(Vec::new());
            }
            return Err(Error::CollectorFailed {
                collector: self.name().into(),
                reason: format!(
                    "discovery tool exited with {:?}: {}",
                    output.status,
                    output.stderr.trim()
                ),
            });
        }

        for line in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
            warn!("NVMe discovery: {}", line.trim());
        }

        match serde_json::from_slice::<DiscoveryReport>(&output.stdout) {
            Ok(report) => {
                info!(
                    "NVMe discovery found {} devices",
                    report.total_devices.unwrap_or(report.nvme_devices.len() as u64)
                );
                Ok(report.nvme_devices)
            }
            Err(e) => {
                warn!("Could not parse NVMe discovery output: {}", e);
                Ok(Vec::new())
            }
        }
    }
}
