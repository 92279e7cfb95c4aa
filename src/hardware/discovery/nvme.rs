//! Vendor NVMe Listing
//!
//! Lists NVMe namespaces with `nvme list -o json` and augments each one
//! with partition and mount data from a scoped lsblk call.

use super::kernel::{parse_lsblk, LSBLK_PARTITION_COLUMNS};
use super::lenient;
use crate::domain::device::{NvmeNamespaceUsage, Partition};
use crate::domain::ports::{CommandRunnerRef, SourceCollector};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// nvme-cli Wire Format
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct NvmeListOutput {
    #[serde(rename = "Devices", default)]
    devices: Vec<NvmeListEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NvmeListEntry {
    #[serde(rename = "DevicePath")]
    device_path: String,
    #[serde(rename = "ModelNumber", default)]
    model_number: Option<String>,
    #[serde(rename = "SerialNumber", default)]
    serial_number: Option<String>,
    #[serde(rename = "Vendor", default)]
    vendor: Option<String>,
    #[serde(rename = "Firmware", default)]
    firmware: Option<String>,
    #[serde(rename = "PhysicalSize", default, deserialize_with = "lenient::opt_u64")]
    physical_size: Option<u64>,
    #[serde(rename = "SectorSize", default, deserialize_with = "lenient::opt_u64")]
    sector_size: Option<u64>,
    #[serde(rename = "NameSpace", default, deserialize_with = "lenient::opt_u32")]
    namespace: Option<u32>,
    #[serde(rename = "UsedBytes", default, deserialize_with = "lenient::opt_u64")]
    used_bytes: Option<u64>,
    #[serde(rename = "MaximumLBA", default, deserialize_with = "lenient::opt_u64")]
    maximum_lba: Option<u64>,
    #[serde(rename = "Transport", default)]
    transport: Option<String>,
    #[serde(rename = "Address", default)]
    address: Option<String>,
}

// =============================================================================
// Vendor Record
// =============================================================================

/// One namespace as reported by nvme-cli
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VendorNvmeRecord {
    pub name: String,
    pub device_path: String,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub vendor: Option<String>,
    pub firmware: Option<String>,
    pub size_bytes: u64,
    pub sector_size: Option<u64>,
    pub namespace: NvmeNamespaceUsage,
    /// Free-form transport description, may embed a PCIe address
    pub transport_hint: Option<String>,
    pub partitions: Vec<Partition>,
    pub mountpoints: Vec<String>,
    pub fstype: Option<String>,
    pub uuid: Option<String>,
    pub part_uuid: Option<String>,
}

impl From<NvmeListEntry> for VendorNvmeRecord {
    fn from(entry: NvmeListEntry) -> Self {
        let name = entry
            .device_path
            .rsplit('/')
            .next()
            .unwrap_or(&entry.device_path)
            .to_string();

        let transport_hint = match (entry.transport, entry.address) {
            (Some(t), Some(a)) => Some(format!("{} {}", t, a)),
            (t, a) => t.or(a),
        };

        Self {
            name,
            device_path: entry.device_path,
            model: entry.model_number,
            serial: entry.serial_number,
            vendor: entry.vendor,
            firmware: entry.firmware,
            size_bytes: entry.physical_size.unwrap_or(0),
            sector_size: entry.sector_size,
            namespace: NvmeNamespaceUsage {
                namespace_id: entry.namespace,
                used_bytes: entry.used_bytes,
                maximum_lba: entry.maximum_lba,
            },
            transport_hint,
            ..Default::default()
        }
    }
}

fn parse_nvme_list(stdout: &[u8]) -> Result<Vec<VendorNvmeRecord>> {
    let output: NvmeListOutput = serde_json::from_slice(stdout)?;
    Ok(output.devices.into_iter().map(VendorNvmeRecord::from).collect())
}

// =============================================================================
// Collector
// =============================================================================

/// Collects NVMe namespaces from nvme-cli
pub struct VendorNvmeCollector {
    runner: CommandRunnerRef,
    nvme_cli: String,
    lsblk: String,
    timeout: Duration,
}

impl VendorNvmeCollector {
    pub fn new(runner: CommandRunnerRef, nvme_cli: &str, lsblk: &str, timeout: Duration) -> Self {
        Self {
            runner,
            nvme_cli: nvme_cli.to_string(),
            lsblk: lsblk.to_string(),
            timeout,
        }
    }

    /// Attach partitions and mounts; failure leaves the record untouched
    async fn augment(&self, mut record: VendorNvmeRecord) -> VendorNvmeRecord {
        let args = ["-J", "-b", "-o", LSBLK_PARTITION_COLUMNS, record.device_path.as_str()];
        let node = match self.runner.run(&self.lsblk, &args, self.timeout).await {
            Ok(out) if out.success() => match parse_lsblk(&out.stdout) {
                Ok(nodes) => nodes.into_iter().next(),
                Err(e) => {
                    warn!("Could not parse partition info for {}: {}", record.name, e);
                    None
                }
            },
            Ok(out) => {
                warn!("Could not get partition info for {}: {}", record.name, out.stderr.trim());
                None
            }
            Err(e) => {
                warn!("Could not get partition info for {}: {}", record.name, e);
                None
            }
        };

        if let Some(node) = node {
            record.partitions = node.partitions();
            record.mountpoints = node.all_mounts();
            record.fstype = node.fstype;
            record.uuid = node.uuid;
            record.part_uuid = node.partuuid;
        }
        record
    }
}

#[async_trait]
impl SourceCollector for VendorNvmeCollector {
    type Record = VendorNvmeRecord;

    fn name(&self) -> &'static str {
        "vendor"
    }

    async fn collect(&self) -> Result<Vec<VendorNvmeRecord>> {
        let output = self
            .runner
            .run(&self.nvme_cli, &["list", "-o", "json"], self.timeout)
            .await?;

        if !output.success() {
            return Err(Error::CollectorFailed {
                collector: self.name().into(),
                reason: format!("nvme list exited with {:?}: {}", output.status, output.stderr.trim()),
            });
        }

        let records = parse_nvme_list(&output.stdout)?;
        debug!("nvme-cli reported {} namespaces", records.len());

        Ok(join_all(records.into_iter().map(|r| self.augment(r))).await)
    }
}
