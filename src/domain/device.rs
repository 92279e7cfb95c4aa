//! Unified Device Model
//!
//! The entities produced by reconciliation. A `Device` is built fresh for
//! every inventory request and is never mutated once reconciliation ends.

use crate::engine::bdev::DriverKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Device Type
// =============================================================================

/// Device type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Block,
    Nvme,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Block => write!(f, "block"),
            DeviceType::Nvme => write!(f, "nvme"),
        }
    }
}

// =============================================================================
// Device Parts
// =============================================================================

/// A partition of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub device_path: String,
    /// Human readable size
    pub size: String,
    pub size_bytes: u64,
    pub mountpoint: Option<String>,
    pub fstype: Option<String>,
    pub uuid: Option<String>,
    pub part_uuid: Option<String>,
}

/// Engine bdev that claims a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpdkBdevInfo {
    pub bdev_name: String,
    /// Engine product name (e.g. "NVMe disk", "AIO disk")
    pub bdev_type: Option<String>,
    pub driver_kind: DriverKind,
    pub block_size: u64,
    pub num_blocks: u64,
    pub size_bytes: u64,
    pub uuid: Option<String>,
    /// Raw driver-specific payload as reported by the engine
    pub driver_specific: Value,
}

/// Identity recovered by the out-of-band discovery probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NvmeDiscoveryInfo {
    pub pcie_addr: Option<String>,
    pub vendor_id: Option<String>,
    pub subsystem_vendor_id: Option<String>,
    pub firmware_version: Option<String>,
    pub namespace_count: Option<u32>,
    pub max_namespaces: Option<u32>,
    pub transport_type: Option<String>,
    pub discovery_capacity_gb: Option<f64>,
    pub discovery_capacity_bytes: Option<u64>,
}

/// Namespace usage reported by nvme-cli
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvmeNamespaceUsage {
    pub namespace_id: Option<u32>,
    pub used_bytes: Option<u64>,
    pub maximum_lba: Option<u64>,
}

// =============================================================================
// Device
// =============================================================================

/// One physical or virtual device in the unified inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Deduplication key; internal only
    #[serde(skip)]
    pub(crate) identity_key: String,
    /// Raw device name (e.g. nvme0n1, sda, or the PCIe address of a virtual device)
    pub name: String,
    /// Human-facing name
    pub display_name: String,
    /// Owned by an in-kernel block driver
    pub kernel_mode: bool,
    /// Block node; `None` for user-space-only NVMe controllers
    pub device_path: Option<String>,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub transport: String,
    pub model: Option<String>,
    pub vendor: Option<String>,
    pub serial: Option<String>,
    pub firmware: Option<String>,
    pub rotational: bool,
    pub readonly: bool,
    pub removable: bool,
    pub hotplug: bool,
    pub physical_sector_size: Option<u64>,
    pub logical_sector_size: Option<u64>,
    /// Human readable size
    pub size: String,
    pub size_bytes: u64,
    pub fstype: Option<String>,
    pub uuid: Option<String>,
    pub part_uuid: Option<String>,
    pub partitions: Vec<Partition>,
    pub mountpoints: Vec<String>,
    pub is_mounted: bool,
    pub is_spdk_bdev: bool,
    pub spdk_bdev_info: Option<SpdkBdevInfo>,
    pub pcie_addr: Option<String>,
    pub nvme_namespace: Option<NvmeNamespaceUsage>,
    pub nvme_discovery_info: Option<NvmeDiscoveryInfo>,
}

impl Device {
    /// Start a device with every optional attribute unset
    pub(crate) fn bare(
        identity_key: String,
        name: String,
        device_path: Option<String>,
        device_type: DeviceType,
        kernel_mode: bool,
    ) -> Self {
        Self {
            identity_key,
            display_name: name.clone(),
            name,
            kernel_mode,
            device_path,
            device_type,
            transport: "unknown".to_string(),
            model: None,
            vendor: None,
            serial: None,
            firmware: None,
            rotational: false,
            readonly: false,
            removable: false,
            hotplug: false,
            physical_sector_size: None,
            logical_sector_size: None,
            size: format_size(0),
            size_bytes: 0,
            fstype: None,
            uuid: None,
            part_uuid: None,
            partitions: Vec::new(),
            mountpoints: Vec::new(),
            is_mounted: false,
            is_spdk_bdev: false,
            spdk_bdev_info: None,
            pcie_addr: None,
            nvme_namespace: None,
            nvme_discovery_info: None,
        }
    }

    pub fn identity_key(&self) -> &str {
        &self.identity_key
    }

    /// Free for new use: not mounted, not claimed by the engine, writable, fixed
    pub fn is_available(&self) -> bool {
        !self.is_mounted && !self.is_spdk_bdev && !self.readonly && !self.removable
    }

    /// Lookup by raw name, display name or device path
    pub fn matches(&self, name_or_path: &str) -> bool {
        self.name == name_or_path
            || self.display_name == name_or_path
            || self.device_path.as_deref() == Some(name_or_path)
    }
}

/// Format a byte count for display (1024 base, two decimals)
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2}{}", value, UNITS[unit])
}

/// Trim an identity string; empty and "Unknown" placeholders mean absent
pub(crate) fn normalize_ident(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("unknown"))
        .map(str::to_string)
}
