//! Domain layer - Device model and port definitions
//!
//! This module defines the unified device model and the traits (ports)
//! that adapters implement: the engine RPC channel, command execution and
//! device source collection.

pub mod device;
pub mod ports;

pub use device::*;
pub use ports::*;
