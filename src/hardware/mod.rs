//! Hardware Module
//!
//! Device source collection, reconciliation into the unified inventory and
//! inventory statistics.

pub mod discovery;
pub mod reconcile;
pub mod stats;

pub use discovery::*;
pub use reconcile::{ReconciliationEngine, SourceSnapshot};
pub use stats::DiskStats;
