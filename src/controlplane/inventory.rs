//! Inventory Service
//!
//! Entry point for inventory requests. Each request fans out to every
//! collector concurrently, reconciles the results and throws them away
//! afterwards; nothing is cached between requests.

use crate::config::ManagerConfig;
use crate::domain::device::Device;
use crate::domain::ports::{CommandRunnerRef, SourceCollector};
use crate::engine::catalog::SpdkClient;
use crate::engine::transport::RpcTransport;
use crate::error::{Error, Result};
use crate::hardware::discovery::{
    DiscoveryToolCollector, EngineInventoryCollector, HealthReport, HealthStatus,
    KernelBlockCollector, MountTable, MountTableReader, SmartProbe, SystemCommandRunner,
    VendorNvmeCollector,
};
use crate::hardware::reconcile::{ReconciliationEngine, SourceSnapshot};
use crate::hardware::stats::DiskStats;
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inventory with its collection time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReport {
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub devices: Vec<Device>,
}

/// Run one collector; a failure contributes nothing
async fn collect_or_empty<C: SourceCollector>(collector: &C) -> Vec<C::Record> {
    match collector.collect().await {
        Ok(records) => records,
        Err(e) => {
            warn!("Collector {} failed: {}", collector.name(), e);
            metrics::record_collector_failure(collector.name());
            Vec::new()
        }
    }
}

/// Unified device inventory over all sources
pub struct InventoryService {
    kernel: KernelBlockCollector,
    vendor: VendorNvmeCollector,
    engine: EngineInventoryCollector,
    discovery: DiscoveryToolCollector,
    mounts: MountTableReader,
    smart: SmartProbe,
    reconciler: ReconciliationEngine,
}

impl InventoryService {
    /// Create the service over explicit collaborators
    pub fn new(config: &ManagerConfig, runner: CommandRunnerRef, client: SpdkClient) -> Self {
        let system = &config.system;
        let timeout = system.command_timeout();

        Self {
            kernel: KernelBlockCollector::new(
                runner.clone(),
                &system.lsblk,
                system.sysfs_path.clone(),
                timeout,
            ),
            vendor: VendorNvmeCollector::new(runner.clone(), &system.nvme_cli, &system.lsblk, timeout),
            engine: EngineInventoryCollector::new(client),
            discovery: DiscoveryToolCollector::new(runner.clone(), &config.discovery),
            mounts: MountTableReader::new(system.mount_table.clone()),
            smart: SmartProbe::new(runner, &system.smartctl, timeout),
            reconciler: ReconciliationEngine::new(),
        }
    }

    /// Create the service against the local host and engine socket
    pub fn from_config(config: &ManagerConfig) -> Self {
        let client = SpdkClient::new(Arc::new(RpcTransport::new(&config.rpc)));
        Self::new(config, Arc::new(SystemCommandRunner::new()), client)
    }

    /// Collect every source concurrently
    pub async fn snapshot(&self) -> SourceSnapshot {
        let (kernel, vendor, engine, discovery, mounts) = tokio::join!(
            collect_or_empty(&self.kernel),
            collect_or_empty(&self.vendor),
            collect_or_empty(&self.engine),
            collect_or_empty(&self.discovery),
            collect_or_empty(&self.mounts),
        );

        debug!(
            "Collected kernel={} vendor={} engine={} discovery={} mounts={}",
            kernel.len(),
            vendor.len(),
            engine.len(),
            discovery.len(),
            mounts.len()
        );

        SourceSnapshot {
            kernel,
            vendor,
            engine,
            discovery,
            mounts: MountTable::new(mounts),
        }
    }

    /// Build the unified inventory
    pub async fn unified_inventory(&self) -> Vec<Device> {
        let snapshot = self.snapshot().await;
        let devices = self.reconciler.reconcile(&snapshot);

        let stats = DiskStats::from_devices(&devices);
        metrics::record_inventory("nvme", stats.nvme_count);
        metrics::record_inventory("block", stats.block_count);
        info!("Inventory built with {} devices", devices.len());

        devices
    }

    /// Inventory stamped with the collection time
    pub async fn inventory_report(&self) -> InventoryReport {
        let timestamp = Utc::now();
        let devices = self.unified_inventory().await;
        InventoryReport {
            timestamp,
            total: devices.len(),
            devices,
        }
    }

    pub async fn stats(&self) -> DiskStats {
        DiskStats::from_devices(&self.unified_inventory().await)
    }

    /// Look up one device by name, display name or device path
    pub async fn device(&self, name_or_path: &str) -> Result<Device> {
        self.unified_inventory()
            .await
            .into_iter()
            .find(|d| d.matches(name_or_path))
            .ok_or_else(|| Error::DeviceNotFound {
                device: name_or_path.to_string(),
            })
    }

    /// SMART health of one device
    pub async fn device_health(&self, name_or_path: &str) -> Result<HealthReport> {
        let device = self.device(name_or_path).await?;
        match device.device_path.as_deref() {
            Some(path) => Ok(self.smart.health(path).await),
            None => Ok(HealthReport {
                device: device.name,
                status: HealthStatus::Unknown,
                message: "SMART data not available".to_string(),
            }),
        }
    }

    /// Raw SMART document of one device, `None` when unavailable
    pub async fn smart_info(&self, name_or_path: &str) -> Result<Option<Value>> {
        let device = self.device(name_or_path).await?;
        match device.device_path.as_deref() {
            Some(path) => Ok(self.smart.smart_info(path).await),
            None => Ok(None),
        }
    }
}
