//! Control Plane Module
//!
//! Services consumed by outer surfaces (the CLI here, an HTTP layer
//! elsewhere): the unified inventory and its lookups.

pub mod inventory;

pub use inventory::{InventoryReport, InventoryService};
