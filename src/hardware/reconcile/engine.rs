//! Reconciliation Engine
//!
//! Builds the unified inventory from a [`SourceSnapshot`] in six passes:
//!
//! 1. seed kernel disks
//! 2. merge nvme-cli records not already seeded
//! 3. synthesize devices seen only by the discovery probe
//! 4. attach discovery identity to user-space NVMe devices
//! 5. mark mounted devices
//! 6. mark devices claimed by engine bdevs
//!
//! The identity map keeps insertion order, so the first source to seed a
//! key owns it and later passes only fill gaps.

use super::matching::{discovery_by_model_serial, find_owner, match_discovery, MatchTier};
use super::SourceSnapshot;
use crate::domain::device::{format_size, normalize_ident, Device, DeviceType, NvmeDiscoveryInfo, SpdkBdevInfo};
use crate::engine::bdev::Bdev;
use crate::hardware::discovery::pcie::{normalize_pcie_addr, resolve_pcie_addr};
use crate::hardware::discovery::{DiscoveredNvme, KernelBlockDevice, VendorNvmeRecord};
use indexmap::IndexMap;
use tracing::debug;

type IdentityMap = IndexMap<String, Device>;

fn nvme_key(pcie: &str) -> String {
    format!("nvme:{}", pcie)
}

fn device_key(path: &str) -> String {
    format!("device:{}", path)
}

fn user_key(path: &str, serial: Option<&str>) -> String {
    format!("user:{}:{}", path, serial.unwrap_or_default())
}

/// Pure merge of collector outputs
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationEngine;

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Build the inventory; identical snapshots always give identical output
    pub fn reconcile(&self, snapshot: &SourceSnapshot) -> Vec<Device> {
        let mut map = IdentityMap::new();

        self.seed_kernel(&mut map, snapshot);
        self.merge_vendor(&mut map, snapshot);
        self.synthesize_virtual(&mut map, &snapshot.discovery);
        self.enrich_from_discovery(&mut map, &snapshot.discovery);
        self.classify(&mut map, snapshot);

        map.into_values().collect()
    }

    // =========================================================================
    // Pass 1: kernel seed
    // =========================================================================

    fn seed_kernel(&self, map: &mut IdentityMap, snapshot: &SourceSnapshot) {
        for kernel in &snapshot.kernel {
            let pcie = if kernel.is_nvme {
                // nvme-cli's transport string is the middle layer
                let transport = snapshot
                    .vendor
                    .iter()
                    .find(|v| v.device_path == kernel.device_path)
                    .and_then(|v| v.transport_hint.as_deref());
                resolve_pcie_addr(
                    kernel.pcie_from_block.as_deref(),
                    transport,
                    kernel.pcie_from_controller.as_deref(),
                )
            } else {
                None
            };

            // Namespaces of one controller share its address
            let key = match pcie.as_deref().map(nvme_key) {
                Some(key) if !map.contains_key(&key) => key,
                _ => device_key(&kernel.device_path),
            };
            if map.contains_key(&key) {
                debug!("Skipping duplicate kernel device {}", kernel.device_path);
                continue;
            }

            let device = kernel_device(kernel, key.clone(), pcie);
            map.insert(key, device);
        }
    }

    // =========================================================================
    // Pass 2: vendor merge
    // =========================================================================

    fn merge_vendor(&self, map: &mut IdentityMap, snapshot: &SourceSnapshot) {
        for record in &snapshot.vendor {
            let path = record.device_path.trim();
            let model = normalize_ident(record.model.as_deref());
            let serial = normalize_ident(record.serial.as_deref());

            let seeded = map.values_mut().find(|d| {
                d.kernel_mode
                    && d.device_path.as_deref() == Some(path)
                    && d.serial == serial
                    && d.model == model
            });
            if let Some(existing) = seeded {
                debug!("nvme-cli record {} already seeded by the kernel", path);
                if existing.firmware.is_none() {
                    existing.firmware = normalize_ident(record.firmware.as_deref());
                }
                if existing.nvme_namespace.is_none() {
                    existing.nvme_namespace = Some(record.namespace.clone());
                }
                continue;
            }

            let pcie = discovery_by_model_serial(model.as_deref(), serial.as_deref(), &snapshot.discovery)
                .and_then(|r| r.pcie_addr.as_deref())
                .and_then(normalize_pcie_addr);
            let key = match pcie.as_deref() {
                Some(p) => nvme_key(p),
                None => user_key(path, serial.as_deref()),
            };
            if map.contains_key(&key) {
                debug!("Identity {} already seeded, skipping nvme-cli record {}", key, path);
                continue;
            }

            let device = vendor_device(record, key.clone(), pcie);
            map.insert(key, device);
        }
    }

    // =========================================================================
    // Pass 3: discovery-only devices
    // =========================================================================

    fn synthesize_virtual(&self, map: &mut IdentityMap, discovery: &[DiscoveredNvme]) {
        for record in discovery {
            let Some(pcie) = record.pcie_addr.as_deref().and_then(normalize_pcie_addr) else {
                continue;
            };
            let key = nvme_key(&pcie);
            let known = map.contains_key(&key)
                || map.values().any(|d| d.pcie_addr.as_deref() == Some(pcie.as_str()));
            if known {
                continue;
            }

            debug!("Controller {} is visible only to the discovery probe", pcie);
            let device = virtual_device(record, key.clone(), pcie);
            map.insert(key, device);
        }
    }

    // =========================================================================
    // Pass 4: discovery enrichment
    // =========================================================================

    fn enrich_from_discovery(&self, map: &mut IdentityMap, discovery: &[DiscoveredNvme]) {
        for device in map.values_mut() {
            if device.kernel_mode {
                device.nvme_discovery_info = None;
                continue;
            }
            if device.device_type != DeviceType::Nvme {
                continue;
            }

            let Some((record, tier)) = match_discovery(device, discovery) else {
                continue;
            };
            if tier == MatchTier::ModelOnly {
                debug!(
                    "Low-confidence discovery match for {} by model only",
                    device.display_name
                );
            }

            device.nvme_discovery_info = Some(discovery_info(record));
            if device.model.is_none() {
                device.model = normalize_ident(record.model_number.as_deref());
            }
            if device.serial.is_none() {
                device.serial = normalize_ident(record.serial_number.as_deref());
            }
            if device.firmware.is_none() {
                device.firmware = normalize_ident(record.firmware_version.as_deref());
            }
            if device.pcie_addr.is_none() {
                device.pcie_addr = record.pcie_addr.as_deref().and_then(normalize_pcie_addr);
            }
        }
    }

    // =========================================================================
    // Passes 5 and 6: mount and engine classification
    // =========================================================================

    fn classify(&self, map: &mut IdentityMap, snapshot: &SourceSnapshot) {
        for device in map.values_mut() {
            device.is_mounted = match device.device_path.as_deref() {
                Some(path) => {
                    !device.mountpoints.is_empty()
                        || device.partitions.iter().any(|p| p.mountpoint.is_some())
                        || snapshot.mounts.contains_device(path)
                }
                None => false,
            };

            if let Some(bdev) = find_owner(device, &snapshot.engine) {
                device.is_spdk_bdev = true;
                device.spdk_bdev_info = Some(bdev_info(bdev));
            }
        }
    }
}

// =============================================================================
// Device Builders
// =============================================================================

fn kernel_device(kernel: &KernelBlockDevice, key: String, pcie: Option<String>) -> Device {
    let device_type = if kernel.is_nvme {
        DeviceType::Nvme
    } else {
        DeviceType::Block
    };
    let mut device = Device::bare(
        key.clone(),
        kernel.name.clone(),
        Some(kernel.device_path.clone()),
        device_type,
        true,
    );

    if key.starts_with("nvme:") {
        if let Some(p) = &pcie {
            device.display_name = p.clone();
        }
    }
    let fallback_transport = if kernel.is_nvme { "nvme" } else { "unknown" };
    device.transport = kernel
        .transport
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| fallback_transport.to_string());
    device.model = normalize_ident(kernel.model.as_deref());
    device.vendor = normalize_ident(kernel.vendor.as_deref());
    device.serial = normalize_ident(kernel.serial.as_deref());
    device.rotational = kernel.rotational;
    device.readonly = kernel.readonly;
    device.removable = kernel.removable;
    device.hotplug = kernel.hotplug;
    device.physical_sector_size = kernel.physical_sector_size;
    device.logical_sector_size = kernel.logical_sector_size;
    device.size_bytes = kernel.size_bytes;
    device.size = format_size(kernel.size_bytes);
    device.fstype = kernel.fstype.clone();
    device.uuid = kernel.uuid.clone();
    device.part_uuid = kernel.part_uuid.clone();
    device.partitions = kernel.partitions.clone();
    device.mountpoints = kernel.mountpoints.clone();
    device.pcie_addr = pcie;
    device
}

fn vendor_device(record: &VendorNvmeRecord, key: String, pcie: Option<String>) -> Device {
    let mut device = Device::bare(
        key,
        record.name.clone(),
        Some(record.device_path.trim().to_string()),
        DeviceType::Nvme,
        false,
    );

    if let Some(p) = &pcie {
        device.display_name = p.clone();
    }
    device.transport = "nvme".to_string();
    device.model = normalize_ident(record.model.as_deref());
    device.vendor = normalize_ident(record.vendor.as_deref());
    device.serial = normalize_ident(record.serial.as_deref());
    device.firmware = normalize_ident(record.firmware.as_deref());
    device.hotplug = true;
    device.physical_sector_size = record.sector_size;
    device.logical_sector_size = record.sector_size;
    device.size_bytes = record.size_bytes;
    device.size = format_size(record.size_bytes);
    device.fstype = record.fstype.clone();
    device.uuid = record.uuid.clone();
    device.part_uuid = record.part_uuid.clone();
    device.partitions = record.partitions.clone();
    device.mountpoints = record.mountpoints.clone();
    device.nvme_namespace = Some(record.namespace.clone());
    device.pcie_addr = pcie;
    device
}

fn virtual_device(record: &DiscoveredNvme, key: String, pcie: String) -> Device {
    let mut device = Device::bare(key, pcie.clone(), None, DeviceType::Nvme, false);

    let size_bytes = record
        .total_capacity_bytes
        .or_else(|| record.total_capacity_gb.map(|gb| (gb * 1_000_000_000.0) as u64))
        .unwrap_or(0);

    device.transport = record
        .transport_type
        .as_deref()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "pcie".to_string());
    device.model = normalize_ident(record.model_number.as_deref());
    device.serial = normalize_ident(record.serial_number.as_deref());
    device.firmware = normalize_ident(record.firmware_version.as_deref());
    device.size_bytes = size_bytes;
    device.size = format_size(size_bytes);
    device.pcie_addr = Some(pcie);
    device
}

fn discovery_info(record: &DiscoveredNvme) -> NvmeDiscoveryInfo {
    NvmeDiscoveryInfo {
        pcie_addr: record
            .pcie_addr
            .as_deref()
            .and_then(normalize_pcie_addr)
            .or_else(|| record.pcie_addr.clone()),
        vendor_id: record.vendor_id.clone(),
        subsystem_vendor_id: record.subsystem_vendor_id.clone(),
        firmware_version: record.firmware_version.as_deref().map(|f| f.trim().to_string()),
        namespace_count: record.namespace_count,
        max_namespaces: record.max_namespaces,
        transport_type: record.transport_type.clone(),
        discovery_capacity_gb: record.total_capacity_gb,
        discovery_capacity_bytes: record.total_capacity_bytes,
    }
}

fn bdev_info(bdev: &Bdev) -> SpdkBdevInfo {
    SpdkBdevInfo {
        bdev_name: bdev.name.clone(),
        bdev_type: bdev.product_name.clone(),
        driver_kind: bdev.kind(),
        block_size: bdev.block_size,
        num_blocks: bdev.num_blocks,
        size_bytes: bdev.size_bytes(),
        uuid: bdev.uuid.clone(),
        driver_specific: bdev.driver_specific.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::{NvmeNamespaceUsage, Partition};
    use crate::engine::bdev::{parse_bdev_list, DriverKind};
    use crate::hardware::discovery::MountTable;
    use serde_json::json;
    use std::collections::HashSet;

    fn kernel_nvme(name: &str, pcie: Option<&str>, model: &str, serial: &str) -> KernelBlockDevice {
        KernelBlockDevice {
            name: name.into(),
            device_path: format!("/dev/{}", name),
            size_bytes: 1_000_204_886_016,
            transport: Some("nvme".into()),
            model: Some(model.into()),
            serial: Some(serial.into()),
            is_nvme: true,
            pcie_from_block: pcie.map(String::from),
            ..Default::default()
        }
    }

    fn kernel_block(name: &str) -> KernelBlockDevice {
        KernelBlockDevice {
            name: name.into(),
            device_path: format!("/dev/{}", name),
            size_bytes: 500_107_862_016,
            transport: Some("sata".into()),
            rotational: true,
            ..Default::default()
        }
    }

    fn vendor(path: &str, model: &str, serial: &str) -> VendorNvmeRecord {
        VendorNvmeRecord {
            name: path.rsplit('/').next().unwrap().into(),
            device_path: path.into(),
            model: Some(model.into()),
            serial: Some(serial.into()),
            firmware: Some("FW1".into()),
            size_bytes: 1024,
            namespace: NvmeNamespaceUsage {
                namespace_id: Some(1),
                used_bytes: Some(512),
                maximum_lba: Some(2),
            },
            ..Default::default()
        }
    }

    fn discovered(pcie: &str, model: &str, serial: Option<&str>) -> DiscoveredNvme {
        DiscoveredNvme {
            pcie_addr: Some(pcie.into()),
            model_number: Some(model.into()),
            serial_number: serial.map(String::from),
            firmware_version: Some("2.0".into()),
            vendor_id: Some("0x8086".into()),
            total_capacity_bytes: Some(2_000_000_000),
            namespace_count: Some(1),
            ..Default::default()
        }
    }

    fn reconcile(snapshot: &SourceSnapshot) -> Vec<Device> {
        ReconciliationEngine::new().reconcile(snapshot)
    }

    #[test]
    fn test_kernel_nvme_merge_suppresses_discovery_info() {
        let snapshot = SourceSnapshot {
            kernel: vec![kernel_nvme("nvme0n1", Some("0000:00:04.0"), "X", "Y")],
            discovery: vec![discovered("0000:00:04.0", "X", Some("Y"))],
            ..Default::default()
        };

        let devices = reconcile(&snapshot);
        assert_eq!(devices.len(), 1);
        let d = &devices[0];
        assert!(d.kernel_mode);
        assert_eq!(d.pcie_addr.as_deref(), Some("0000:00:04.0"));
        assert_eq!(d.display_name, "0000:00:04.0");
        assert_eq!(d.identity_key(), "nvme:0000:00:04.0");
        assert!(d.nvme_discovery_info.is_none());
    }

    #[test]
    fn test_vendor_duplicate_of_kernel_device() {
        let snapshot = SourceSnapshot {
            kernel: vec![kernel_nvme("nvme1n1", None, "M", "S")],
            vendor: vec![vendor("/dev/nvme1n1", "M", "S")],
            ..Default::default()
        };

        let devices = reconcile(&snapshot);
        assert_eq!(devices.len(), 1);
        assert!(devices[0].kernel_mode);
        assert_eq!(devices[0].identity_key(), "device:/dev/nvme1n1");
        assert_eq!(devices[0].firmware.as_deref(), Some("FW1"));
        assert_eq!(devices[0].nvme_namespace.as_ref().unwrap().namespace_id, Some(1));
    }

    #[test]
    fn test_virtual_only_synthesis() {
        let snapshot = SourceSnapshot {
            discovery: vec![discovered("0000:00:05.0", "QEMU NVMe Ctrl", Some("deadbeef"))],
            ..Default::default()
        };

        let devices = reconcile(&snapshot);
        assert_eq!(devices.len(), 1);
        let d = &devices[0];
        assert_eq!(d.device_path, None);
        assert!(!d.kernel_mode);
        assert_eq!(d.device_type, DeviceType::Nvme);
        assert!(!d.is_mounted);
        assert_eq!(d.name, "0000:00:05.0");
        assert_eq!(d.size_bytes, 2_000_000_000);
        let info = d.nvme_discovery_info.as_ref().unwrap();
        assert_eq!(info.vendor_id.as_deref(), Some("0x8086"));
        assert_eq!(info.discovery_capacity_bytes, Some(2_000_000_000));
    }

    #[test]
    fn test_vendor_record_keyed_by_discovery_pcie() {
        let snapshot = SourceSnapshot {
            vendor: vec![vendor("/dev/nvme2n1", "M2", "S2")],
            discovery: vec![discovered("0000:00:06.0", "M2", Some("S2"))],
            ..Default::default()
        };

        let devices = reconcile(&snapshot);
        assert_eq!(devices.len(), 1);
        let d = &devices[0];
        assert_eq!(d.identity_key(), "nvme:0000:00:06.0");
        assert!(!d.kernel_mode);
        assert_eq!(d.pcie_addr.as_deref(), Some("0000:00:06.0"));
        assert!(d.nvme_discovery_info.is_some());
    }

    #[test]
    fn test_vendor_record_without_discovery_uses_user_key() {
        let snapshot = SourceSnapshot {
            vendor: vec![vendor("/dev/nvme3n1", "M3", "S3")],
            ..Default::default()
        };
        let devices = reconcile(&snapshot);
        assert_eq!(devices.len(), 1);
        let d = &devices[0];
        assert_eq!(d.identity_key(), "user:/dev/nvme3n1:S3");
        assert!(!d.kernel_mode);
        assert_eq!(d.device_path.as_deref(), Some("/dev/nvme3n1"));
        assert_eq!(d.pcie_addr, None);
        assert_eq!(d.firmware.as_deref(), Some("FW1"));
        assert!(d.nvme_discovery_info.is_none());
    }

    #[test]
    fn test_vendor_record_loses_to_kernel_device_on_same_pcie_key() {
        // different path and identity, so not a duplicate, but discovery ties it to a seeded address
        let snapshot = SourceSnapshot {
            kernel: vec![kernel_nvme("nvme0n1", Some("0000:00:07.0"), "K", "KS")],
            vendor: vec![vendor("/dev/nvme9n1", "M9", "S9")],
            discovery: vec![discovered("0000:00:07.0", "M9", Some("S9"))],
            ..Default::default()
        };

        let devices = reconcile(&snapshot);
        assert_eq!(devices.len(), 1);
        let d = &devices[0];
        assert_eq!(d.identity_key(), "nvme:0000:00:07.0");
        assert!(d.kernel_mode);
        assert_eq!(d.device_path.as_deref(), Some("/dev/nvme0n1"));
        assert_eq!(d.model.as_deref(), Some("K"));
        assert_eq!(d.serial.as_deref(), Some("KS"));
        assert_eq!(d.firmware, None);
        assert!(d.nvme_discovery_info.is_none());
    }

    #[test]
    fn test_vendor_transport_is_second_pcie_layer() {
        let mut kernel = kernel_nvme("nvme0n1", None, "X", "Y");
        kernel.pcie_from_controller = Some("0000:00:0a.0".into());
        let mut record = vendor("/dev/nvme0n1", "X", "Y");
        record.transport_hint = Some("pcie 0000:00:09.0".into());

        let snapshot = SourceSnapshot {
            kernel: vec![kernel],
            vendor: vec![record],
            ..Default::default()
        };
        let devices = reconcile(&snapshot);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].pcie_addr.as_deref(), Some("0000:00:09.0"));
    }

    #[test]
    fn test_namespaces_sharing_a_controller_stay_distinct() {
        let snapshot = SourceSnapshot {
            kernel: vec![
                kernel_nvme("nvme0n1", Some("0000:00:04.0"), "X", "Y"),
                kernel_nvme("nvme0n2", Some("0000:00:04.0"), "X", "Y"),
            ],
            ..Default::default()
        };
        let devices = reconcile(&snapshot);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].identity_key(), "nvme:0000:00:04.0");
        assert_eq!(devices[1].identity_key(), "device:/dev/nvme0n2");
    }

    #[test]
    fn test_identity_keys_unique_and_output_stable() {
        let snapshot = SourceSnapshot {
            kernel: vec![
                kernel_block("sda"),
                kernel_nvme("nvme0n1", Some("0000:00:04.0"), "X", "Y"),
            ],
            vendor: vec![
                vendor("/dev/nvme0n1", "X", "Y"),
                vendor("/dev/nvme5n1", "X", "Y"),
            ],
            discovery: vec![
                discovered("0000:00:04.0", "X", Some("Y")),
                discovered("0000:00:07.0", "Z", None),
            ],
            ..Default::default()
        };

        let first = reconcile(&snapshot);
        let keys: HashSet<_> = first.iter().map(|d| d.identity_key().to_string()).collect();
        assert_eq!(keys.len(), first.len());
        assert_eq!(first, reconcile(&snapshot));

        for d in &first {
            if d.kernel_mode {
                assert!(d.nvme_discovery_info.is_none());
            }
            if d.device_path.is_none() {
                assert!(!d.is_mounted);
            }
        }
    }

    #[test]
    fn test_mount_classification() {
        let mut mounted_part = kernel_block("sda");
        mounted_part.partitions = vec![Partition {
            name: "sda1".into(),
            device_path: "/dev/sda1".into(),
            size: "1.00GB".into(),
            size_bytes: 1 << 30,
            mountpoint: Some("/".into()),
            fstype: Some("ext4".into()),
            uuid: None,
            part_uuid: None,
        }];

        let snapshot = SourceSnapshot {
            kernel: vec![mounted_part, kernel_block("sdb"), kernel_block("sdc")],
            mounts: MountTable::new(MountTable::parse("/dev/sdb1 /data xfs rw 0 0\n")),
            ..Default::default()
        };

        let devices = reconcile(&snapshot);
        assert!(devices[0].is_mounted);
        assert!(devices[1].is_mounted);
        assert!(!devices[2].is_mounted);
    }

    #[test]
    fn test_engine_ownership() {
        let snapshot = SourceSnapshot {
            kernel: vec![kernel_block("sdb")],
            discovery: vec![discovered("0000:00:05.0", "Q", Some("S"))],
            engine: parse_bdev_list(json!([
                {"name": "Nvme0n1", "product_name": "NVMe disk", "block_size": 512, "num_blocks": 100,
                 "uuid": "u-1", "driver_specific": {"mp_policy": "active_passive",
                    "nvme": [{"pci_address": "0000:00:05.0", "trid": {"trtype": "PCIe", "traddr": "0000:00:05.0"}}]}},
                {"name": "aio0", "product_name": "AIO disk", "block_size": 4096, "num_blocks": 10,
                 "driver_specific": {"aio": {"filename": "/dev/sdb"}}}
            ])),
            ..Default::default()
        };

        let devices = reconcile(&snapshot);
        let sdb = devices.iter().find(|d| d.name == "sdb").unwrap();
        assert!(sdb.is_spdk_bdev);
        assert!(!sdb.is_available());
        assert_eq!(sdb.spdk_bdev_info.as_ref().unwrap().bdev_name, "aio0");

        let virt = devices.iter().find(|d| d.name == "0000:00:05.0").unwrap();
        let info = virt.spdk_bdev_info.as_ref().unwrap();
        assert_eq!(info.driver_kind, DriverKind::Nvme);
        assert_eq!(info.size_bytes, 51_200);
        assert_eq!(info.bdev_type.as_deref(), Some("NVMe disk"));
    }
}
