//! Storage Engine Access
//!
//! JSON-RPC transport to the SPDK target, the typed bdev records it
//! returns and the catalog of engine operations.

pub mod bdev;
pub mod catalog;
pub mod transport;

pub use bdev::{Bdev, DriverKind, DriverSpecific};
pub use catalog::{EngineCall, FullConfig, ListenAddress, RaidLevel, SpdkClient, SystemInfo};
pub use transport::{CallState, RpcTransport};
