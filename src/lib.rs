//! SPDK Manager - Storage Engine Control Plane
//!
//! Drives an SPDK target over its JSON-RPC Unix socket and builds a unified
//! inventory of the host's block devices from several partially
//! overlapping sources.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          InventoryService                            │
//! │        unified_inventory · stats · device · health · smart           │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌────────┐ ┌────────┐ ┌────────┐ ┌───────────┐ ┌────────────┐       │
//! │  │ lsblk  │ │nvme-cli│ │ engine │ │ discovery │ │ mount table│       │
//! │  └───┬────┘ └───┬────┘ └───┬────┘ └─────┬─────┘ └─────┬──────┘       │
//! │      └──────────┴──────────┼────────────┴─────────────┘              │
//! │                 ┌──────────┴───────────┐                             │
//! │                 │ ReconciliationEngine │                             │
//! │                 └──────────────────────┘                             │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │        SpdkClient (operation catalog) → RpcTransport (Unix socket)   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`engine`]: JSON-RPC transport, bdev records and the operation catalog
//! - [`hardware`]: device source collectors, reconciliation and statistics
//! - [`controlplane`]: the inventory service
//! - [`domain`]: device model and port traits
//! - [`config`]: manager configuration
//! - [`error`]: error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod metrics;

// Re-export commonly used types
pub use config::{DiscoveryConfig, ManagerConfig, RpcConfig, SystemConfig};

pub use controlplane::{InventoryReport, InventoryService};

pub use domain::device::{format_size, Device, DeviceType, NvmeDiscoveryInfo, Partition, SpdkBdevInfo};
pub use domain::ports::{CommandRunner, RpcChannel, SourceCollector};

pub use engine::{Bdev, DriverKind, EngineCall, RaidLevel, RpcTransport, SpdkClient};

pub use error::{Error, ErrorClass, Result};

pub use hardware::{DiskStats, HealthReport, HealthStatus, ReconciliationEngine, SourceSnapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
