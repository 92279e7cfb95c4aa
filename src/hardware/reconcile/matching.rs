//! Record Matching Rules
//!
//! Predicates deciding when records from different sources describe the
//! same physical device, and which engine bdev claims a device.

use crate::domain::device::{normalize_ident, Device};
use crate::engine::bdev::{Bdev, DriverSpecific};
use crate::hardware::discovery::pcie::normalize_pcie_addr;
use crate::hardware::discovery::probe::DiscoveredNvme;

// =============================================================================
// Discovery Matching
// =============================================================================

/// How a discovery record was tied to a device, strongest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    /// Same PCIe address
    PcieAddress,
    /// Same model and serial, both present on both sides
    ModelSerial,
    /// Same model, neither side has a serial.
    ///
    /// Ambiguous when several drives of one model lack serials; the first
    /// record wins.
    ModelOnly,
}

impl MatchTier {
    pub fn confidence(&self) -> f32 {
        match self {
            MatchTier::PcieAddress => 1.0,
            MatchTier::ModelSerial => 0.9,
            MatchTier::ModelOnly => 0.3,
        }
    }
}

fn record_pcie(record: &DiscoveredNvme) -> Option<String> {
    record.pcie_addr.as_deref().and_then(normalize_pcie_addr)
}

/// Discovery record with exactly this (model, serial); both must be present
pub fn discovery_by_model_serial<'a>(
    model: Option<&str>,
    serial: Option<&str>,
    records: &'a [DiscoveredNvme],
) -> Option<&'a DiscoveredNvme> {
    let model = normalize_ident(model)?;
    let serial = normalize_ident(serial)?;
    records.iter().find(|r| {
        normalize_ident(r.model_number.as_deref()).as_ref() == Some(&model)
            && normalize_ident(r.serial_number.as_deref()).as_ref() == Some(&serial)
    })
}

/// Best discovery record for a device, trying each tier in order
pub fn match_discovery<'a>(
    device: &Device,
    records: &'a [DiscoveredNvme],
) -> Option<(&'a DiscoveredNvme, MatchTier)> {
    if let Some(pcie) = device.pcie_addr.as_deref() {
        if let Some(r) = records.iter().find(|r| record_pcie(r).as_deref() == Some(pcie)) {
            return Some((r, MatchTier::PcieAddress));
        }
    }

    if let Some(r) = discovery_by_model_serial(device.model.as_deref(), device.serial.as_deref(), records) {
        return Some((r, MatchTier::ModelSerial));
    }

    let model = device.model.as_deref()?;
    if device.serial.is_some() {
        return None;
    }
    records
        .iter()
        .find(|r| {
            normalize_ident(r.serial_number.as_deref()).is_none()
                && normalize_ident(r.model_number.as_deref()).as_deref() == Some(model)
        })
        .map(|r| (r, MatchTier::ModelOnly))
}

// =============================================================================
// Engine Ownership
// =============================================================================

/// `needle` occurs in `haystack`; empty strings never match
fn contains_nonempty(haystack: &str, needle: &str) -> bool {
    !haystack.is_empty() && !needle.is_empty() && haystack.contains(needle)
}

/// Whether `bdev` is backed by `device`
pub fn bdev_owns(device: &Device, bdev: &Bdev) -> bool {
    let path = device.device_path.as_deref();

    match &bdev.driver {
        DriverSpecific::Nvme(_) if bdev.driver.has_nvme_identity() => {
            if let Some(pcie) = device.pcie_addr.as_deref() {
                let by_address = bdev
                    .driver
                    .nvme_addresses()
                    .into_iter()
                    .any(|addr| normalize_pcie_addr(addr).as_deref() == Some(pcie));
                if by_address {
                    return true;
                }
            }
            if path.map(|p| contains_nonempty(p, &bdev.name)).unwrap_or(false)
                || contains_nonempty(&bdev.name, &device.name)
            {
                return true;
            }
        }
        DriverSpecific::Aio(_) => {
            if path.is_some() && bdev.driver.aio_filename() == path {
                return true;
            }
        }
        _ => {}
    }

    bdev.aliases.iter().any(|alias| {
        contains_nonempty(alias, &device.name) || path.map(|p| contains_nonempty(p, alias)).unwrap_or(false)
    })
}

/// First bdev, in engine order, backed by `device`
pub fn find_owner<'a>(device: &Device, bdevs: &'a [Bdev]) -> Option<&'a Bdev> {
    bdevs.iter().find(|b| bdev_owns(device, b))
}
