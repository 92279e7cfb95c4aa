//! SMART Health Probe
//!
//! Reads SMART data with `smartctl -a <device> -j` and reduces it to a
//! pass/fail health classification.

use crate::domain::ports::CommandRunnerRef;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

// =============================================================================
// Health Report
// =============================================================================

/// Health classification of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// SMART overall assessment passed
    Healthy,
    /// SMART overall assessment failed
    Unhealthy,
    /// No usable SMART data
    Unknown,
    /// The probe itself failed
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub device: String,
    pub status: HealthStatus,
    pub message: String,
}

impl HealthReport {
    fn new(device: &str, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            device: device.to_string(),
            status,
            message: message.into(),
        }
    }

    /// Classify a smartctl document by `smart_status.passed`
    pub fn from_smart(device: &str, smart: &Value) -> Self {
        match smart.pointer("/smart_status/passed").and_then(Value::as_bool) {
            Some(true) => Self::new(device, HealthStatus::Healthy, "Disk is healthy"),
            Some(false) => Self::new(device, HealthStatus::Unhealthy, "Disk health check failed"),
            None => Self::new(device, HealthStatus::Unknown, "Could not determine disk health"),
        }
    }
}

// =============================================================================
// SMART Probe
// =============================================================================

/// smartctl wrapper
pub struct SmartProbe {
    runner: CommandRunnerRef,
    smartctl: String,
    timeout: Duration,
}

impl SmartProbe {
    pub fn new(runner: CommandRunnerRef, smartctl: &str, timeout: Duration) -> Self {
        Self {
            runner,
            smartctl: smartctl.to_string(),
            timeout,
        }
    }

    /// Raw smartctl JSON.
    ///
    /// smartctl encodes warnings in its exit status bits, so the output is
    /// parsed whatever the exit code.
    pub async fn read(&self, device_path: &str) -> Result<Value> {
        let output = self
            .runner
            .run(&self.smartctl, &["-a", device_path, "-j"], self.timeout)
            .await?;

        let smart: Value = serde_json::from_slice(&output.stdout).map_err(|_| Error::SmartUnavailable {
            device: device_path.to_string(),
        })?;

        if smart.is_object() {
            Ok(smart)
        } else {
            Err(Error::SmartUnavailable {
                device: device_path.to_string(),
            })
        }
    }

    /// Raw SMART data, `None` when unavailable
    pub async fn smart_info(&self, device_path: &str) -> Option<Value> {
        match self.read(device_path).await {
            Ok(smart) => Some(smart),
            Err(e) => {
                warn!("Could not get SMART info for {}: {}", device_path, e);
                None
            }
        }
    }

    pub async fn health(&self, device_path: &str) -> HealthReport {
        match self.read(device_path).await {
            Ok(smart) => HealthReport::from_smart(device_path, &smart),
            Err(Error::SmartUnavailable { .. }) => {
                HealthReport::new(device_path, HealthStatus::Unknown, "SMART data not available")
            }
            Err(e) => {
                warn!("Health check failed for {}: {}", device_path, e);
                HealthReport::new(device_path, HealthStatus::Error, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::discovery::command::testing::FakeRunner;
    use std::sync::Arc;

    fn probe(runner: FakeRunner) -> SmartProbe {
        SmartProbe::new(Arc::new(runner), "smartctl", Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_health_passed_despite_exit_bits() {
        let runner = FakeRunner::new().output(
            "smartctl -a /dev/sda -j",
            Some(4),
            r#"{"device": {"name": "/dev/sda"}, "smart_status": {"passed": true}}"#,
            "",
        );
        let report = probe(runner).health("/dev/sda").await;
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_health_failed() {
        let runner = FakeRunner::new().stdout("smartctl", r#"{"smart_status": {"passed": false}}"#);
        assert_eq!(probe(runner).health("/dev/sdb").await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_health_unknown_without_data() {
        let runner = FakeRunner::new().stdout("smartctl", r#"{"device": {}}"#);
        assert_eq!(probe(runner).health("/dev/sdb").await.status, HealthStatus::Unknown);

        let runner = FakeRunner::new().output("smartctl", Some(2), "", "Smartctl open device failed");
        let probe = probe(runner);
        assert_eq!(probe.health("/dev/sdb").await.status, HealthStatus::Unknown);
        assert_eq!(probe.smart_info("/dev/sdb").await, None);
    }

    #[tokio::test]
    async fn test_health_error_when_probe_fails() {
        let runner = FakeRunner::new().missing("smartctl");
        let report = probe(runner).health("/dev/sdb").await;
        assert_eq!(report.status, HealthStatus::Error);
        assert!(report.message.contains("smartctl"));
    }
}
