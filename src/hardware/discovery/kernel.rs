//! Kernel Block Device Collector
//!
//! Enumerates whole disks from `lsblk` JSON output and captures the sysfs
//! symlink chains used for PCIe address resolution of NVMe namespaces.

use super::lenient;
use super::pcie::{controller_name, is_nvme_namespace_name, pcie_from_symlink};
use crate::domain::device::{format_size, Partition};
use crate::domain::ports::{CommandRunnerRef, SourceCollector};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Columns requested for the full block tree
pub const LSBLK_COLUMNS: &str =
    "NAME,SIZE,TYPE,MOUNTPOINT,FSTYPE,UUID,PARTUUID,MODEL,SERIAL,VENDOR,TRAN,ROTA,RO,RM,HOTPLUG,PHY-SEC,LOG-SEC";

/// Columns requested when augmenting a single device
pub const LSBLK_PARTITION_COLUMNS: &str = "NAME,SIZE,TYPE,MOUNTPOINT,FSTYPE,UUID,PARTUUID";

// =============================================================================
// lsblk Wire Format
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkNode>,
}

/// One node of the lsblk tree
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct LsblkNode {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub size: Option<u64>,
    #[serde(rename = "type", default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub mountpoint: Option<String>,
    /// util-linux 2.37+ reports every mount target
    #[serde(default)]
    pub mountpoints: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub fstype: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub partuuid: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub tran: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub rota: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub ro: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub rm: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub hotplug: bool,
    #[serde(rename = "phy-sec", default, deserialize_with = "lenient::opt_u64")]
    pub phy_sec: Option<u64>,
    #[serde(rename = "log-sec", default, deserialize_with = "lenient::opt_u64")]
    pub log_sec: Option<u64>,
    #[serde(default)]
    pub children: Vec<LsblkNode>,
}

impl LsblkNode {
    pub fn is_disk(&self) -> bool {
        self.node_type.as_deref() == Some("disk")
    }

    pub fn is_partition(&self) -> bool {
        self.node_type.as_deref() == Some("part")
    }

    pub fn device_path(&self) -> String {
        if self.name.starts_with('/') {
            self.name.clone()
        } else {
            format!("/dev/{}", self.name)
        }
    }

    /// Mount targets of this node alone
    pub fn own_mounts(&self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .mountpoints
            .iter()
            .flatten()
            .flatten()
            .filter(|m| !m.is_empty())
            .cloned()
            .collect();
        if let Some(m) = self.mountpoint.as_ref().filter(|m| !m.is_empty()) {
            if !targets.contains(m) {
                targets.insert(0, m.clone());
            }
        }
        targets
    }

    /// `part` children as partitions
    pub fn partitions(&self) -> Vec<Partition> {
        self.children
            .iter()
            .filter(|c| c.is_partition())
            .map(|c| {
                let size_bytes = c.size.unwrap_or(0);
                Partition {
                    name: c.name.clone(),
                    device_path: c.device_path(),
                    size: format_size(size_bytes),
                    size_bytes,
                    mountpoint: c.own_mounts().into_iter().next(),
                    fstype: c.fstype.clone(),
                    uuid: c.uuid.clone(),
                    part_uuid: c.partuuid.clone(),
                }
            })
            .collect()
    }

    /// Own mount targets followed by partition mount targets
    pub fn all_mounts(&self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .children
            .iter()
            .filter(|c| c.is_partition())
            .flat_map(LsblkNode::own_mounts)
            .collect();
        targets.extend(self.own_mounts());
        targets
    }
}

/// Parse lsblk `-J` output into its top-level nodes
pub(crate) fn parse_lsblk(stdout: &[u8]) -> Result<Vec<LsblkNode>> {
    let output: LsblkOutput = serde_json::from_slice(stdout)?;
    Ok(output.blockdevices)
}

// =============================================================================
// Kernel Block Device Record
// =============================================================================

/// A whole disk as seen by the kernel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelBlockDevice {
    pub name: String,
    pub device_path: String,
    pub size_bytes: u64,
    pub transport: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub vendor: Option<String>,
    pub rotational: bool,
    pub readonly: bool,
    pub removable: bool,
    pub hotplug: bool,
    pub physical_sector_size: Option<u64>,
    pub logical_sector_size: Option<u64>,
    pub fstype: Option<String>,
    pub uuid: Option<String>,
    pub part_uuid: Option<String>,
    pub mountpoints: Vec<String>,
    pub partitions: Vec<Partition>,
    /// Classified as an NVMe namespace
    pub is_nvme: bool,
    /// PCIe address from the block device symlink chain
    pub pcie_from_block: Option<String>,
    /// PCIe address from the parent controller symlink chain
    pub pcie_from_controller: Option<String>,
}

impl KernelBlockDevice {
    fn from_node(node: &LsblkNode) -> Self {
        let is_nvme = is_nvme_namespace_name(&node.name)
            || node.tran.as_deref().map(|t| t.eq_ignore_ascii_case("nvme")).unwrap_or(false);

        Self {
            name: node.name.clone(),
            device_path: node.device_path(),
            size_bytes: node.size.unwrap_or(0),
            transport: node.tran.clone(),
            model: node.model.clone(),
            serial: node.serial.clone(),
            vendor: node.vendor.clone(),
            rotational: node.rota,
            readonly: node.ro,
            removable: node.rm,
            hotplug: node.hotplug,
            physical_sector_size: node.phy_sec,
            logical_sector_size: node.log_sec,
            fstype: node.fstype.clone(),
            uuid: node.uuid.clone(),
            part_uuid: node.partuuid.clone(),
            mountpoints: node.all_mounts(),
            partitions: node.partitions(),
            is_nvme,
            pcie_from_block: None,
            pcie_from_controller: None,
        }
    }
}

// =============================================================================
// Collector
// =============================================================================

/// Collects whole disks from lsblk
pub struct KernelBlockCollector {
    runner: CommandRunnerRef,
    lsblk: String,
    sysfs_path: PathBuf,
    timeout: Duration,
}

impl KernelBlockCollector {
    pub fn new(runner: CommandRunnerRef, lsblk: &str, sysfs_path: PathBuf, timeout: Duration) -> Self {
        Self {
            runner,
            lsblk: lsblk.to_string(),
            sysfs_path,
            timeout,
        }
    }

    /// Capture sysfs layers 1 and 3 for an NVMe namespace
    async fn capture_pcie_chains(&self, mut device: KernelBlockDevice) -> KernelBlockDevice {
        if !device.is_nvme {
            return device;
        }

        let block_link = self.sysfs_path.join("block").join(&device.name);
        device.pcie_from_block = pcie_from_symlink(&block_link).await;

        if let Some(ctrl) = controller_name(&device.name) {
            let ctrl_link = self.sysfs_path.join("class/nvme").join(ctrl);
            device.pcie_from_controller = pcie_from_symlink(&ctrl_link).await;
        }

        debug!(
            "PCIe chains for {}: block={:?} controller={:?}",
            device.name, device.pcie_from_block, device.pcie_from_controller
        );
        device
    }
}

#[async_trait]
impl SourceCollector for KernelBlockCollector {
    type Record = KernelBlockDevice;

    fn name(&self) -> &'static str {
        "kernel"
    }

    async fn collect(&self) -> Result<Vec<KernelBlockDevice>> {
        let output = self
            .runner
            .run(&self.lsblk, &["-J", "-b", "-o", LSBLK_COLUMNS], self.timeout)
            .await?;

        if !output.success() {
            return Err(Error::CollectorFailed {
                collector: self.name().into(),
                reason: format!("lsblk exited with {:?}: {}", output.status, output.stderr.trim()),
            });
        }

        let disks: Vec<KernelBlockDevice> = parse_lsblk(&output.stdout)?
            .iter()
            .filter(|node| node.is_disk())
            .map(KernelBlockDevice::from_node)
            .collect();

        let disks = join_all(disks.into_iter().map(|d| self.capture_pcie_chains(d))).await;
        debug!("lsblk reported {} disks", disks.len());
        Ok(disks)
    }
}
