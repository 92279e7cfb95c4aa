//! Inventory statistics.

use crate::domain::device::{Device, DeviceType};
use serde::{Deserialize, Serialize};

/// Aggregate counts over one inventory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStats {
    pub total: usize,
    pub mounted: usize,
    pub engine_owned: usize,
    /// Not mounted, not engine-owned, writable and fixed
    pub available: usize,
    pub nvme_count: usize,
    pub block_count: usize,
    pub total_capacity_bytes: u64,
    pub available_capacity_bytes: u64,
    pub rotational_count: usize,
    pub solid_state_count: usize,
}

impl DiskStats {
    pub fn from_devices(devices: &[Device]) -> Self {
        devices.iter().fold(Self::default(), |mut stats, d| {
            stats.total += 1;
            stats.total_capacity_bytes = stats.total_capacity_bytes.saturating_add(d.size_bytes);

            if d.is_mounted {
                stats.mounted += 1;
            }
            if d.is_spdk_bdev {
                stats.engine_owned += 1;
            }
            if d.is_available() {
                stats.available += 1;
                stats.available_capacity_bytes =
                    stats.available_capacity_bytes.saturating_add(d.size_bytes);
            }
            match d.device_type {
                DeviceType::Nvme => stats.nvme_count += 1,
                DeviceType::Block => stats.block_count += 1,
            }
            if d.rotational {
                stats.rotational_count += 1;
            } else {
                stats.solid_state_count += 1;
            }
            stats
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(name: &str, device_type: DeviceType, size: u64) -> Device {
        let mut d = Device::bare(
            format!("device:/dev/{}", name),
            name.into(),
            Some(format!("/dev/{}", name)),
            device_type,
            true,
        );
        d.size_bytes = size;
        d
    }

    #[test]
    fn test_empty_inventory() {
        assert_eq!(DiskStats::from_devices(&[]), DiskStats::default());
    }

    #[test]
    fn test_availability_excludes_readonly_and_removable() {
        let free = disk("nvme0n1", DeviceType::Nvme, 100);

        let mut mounted = disk("sda", DeviceType::Block, 200);
        mounted.is_mounted = true;
        mounted.rotational = true;

        let mut owned = disk("nvme1n1", DeviceType::Nvme, 300);
        owned.is_spdk_bdev = true;

        let mut readonly = disk("sdb", DeviceType::Block, 400);
        readonly.readonly = true;

        let mut usb = disk("sdc", DeviceType::Block, 500);
        usb.removable = true;

        let stats = DiskStats::from_devices(&[free, mounted, owned, readonly, usb]);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.mounted, 1);
        assert_eq!(stats.engine_owned, 1);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.available_capacity_bytes, 100);
        assert_eq!(stats.total_capacity_bytes, 1500);
        assert_eq!(stats.nvme_count, 2);
        assert_eq!(stats.block_count, 3);
        assert_eq!(stats.rotational_count, 1);
        assert_eq!(stats.solid_state_count, 4);
    }
}
