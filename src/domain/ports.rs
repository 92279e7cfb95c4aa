//! Domain Ports - Core trait definitions for the SPDK manager
//!
//! These traits define the boundaries between the reconciliation logic and
//! external systems. Adapters implement these traits to provide concrete
//! functionality; tests substitute scripted fakes.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Engine RPC Port
// =============================================================================

/// Port for issuing RPC calls to the storage engine
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Issue one call; `timeout` overrides the channel default
    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value>;

    /// Check that the engine endpoint is reachable
    async fn check_connection(&self) -> Result<()>;

    /// Human readable endpoint (socket path)
    fn endpoint(&self) -> String;
}

// =============================================================================
// Command Execution Port
// =============================================================================

/// Captured output of an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Port for running host tools (lsblk, nvme-cli, smartctl, discovery probe)
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, killing it once `timeout` elapses.
    ///
    /// A non-zero exit is not an error at this layer; spawn failures and
    /// timeouts are.
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput>;
}

// =============================================================================
// Device Source Port
// =============================================================================

/// Port for one independent device listing
#[async_trait]
pub trait SourceCollector: Send + Sync {
    /// Raw record type produced by this source
    type Record: Send;

    /// Collector name, used in logs and metrics
    fn name(&self) -> &'static str;

    /// Collect the current listing
    async fn collect(&self) -> Result<Vec<Self::Record>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type RpcChannelRef = Arc<dyn RpcChannel>;
pub type CommandRunnerRef = Arc<dyn CommandRunner>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput {
            status: Some(0),
            stdout: b"{}".to_vec(),
            stderr: String::new(),
        };
        assert!(ok.success());
        assert_eq!(ok.stdout_lossy(), "{}");

        let killed = CommandOutput::default();
        assert!(!killed.success());
    }
}
