//! Device Source Collectors
//!
//! Independent, individually failable listings of the devices on this host:
//! the kernel block tree, nvme-cli, the engine's bdevs, the out-of-band
//! discovery probe and the mount table. SMART probing lives here as well
//! since it shares the command runner.

pub mod command;
pub mod engine;
pub mod kernel;
pub(crate) mod lenient;
pub mod mounts;
pub mod nvme;
pub mod pcie;
pub mod probe;
pub mod smart;

pub use command::SystemCommandRunner;
pub use engine::EngineInventoryCollector;
pub use kernel::{KernelBlockCollector, KernelBlockDevice};
pub use mounts::{MountEntry, MountTable, MountTableReader};
pub use nvme::{VendorNvmeCollector, VendorNvmeRecord};
pub use probe::{classify_stderr, BenignPattern, DiscoveredNvme, DiscoveryReport, DiscoveryToolCollector};
pub use smart::{HealthReport, HealthStatus, SmartProbe};
