//! Device Reconciliation
//!
//! Merges the per-source snapshots into one deduplicated inventory.

pub mod engine;
pub mod matching;

pub use engine::ReconciliationEngine;
pub use matching::MatchTier;

use crate::engine::bdev::Bdev;
use crate::hardware::discovery::{DiscoveredNvme, KernelBlockDevice, MountTable, VendorNvmeRecord};

/// Everything the collectors returned for one inventory request
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    pub kernel: Vec<KernelBlockDevice>,
    pub vendor: Vec<VendorNvmeRecord>,
    pub engine: Vec<Bdev>,
    pub discovery: Vec<DiscoveredNvme>,
    pub mounts: MountTable,
}
