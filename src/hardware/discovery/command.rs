//! Host Command Execution
//!
//! Runs lsblk, nvme-cli, smartctl and the discovery probe as child
//! processes with a hard timeout.

use crate::domain::ports::{CommandOutput, CommandRunner};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Runs commands on the local host via tokio::process
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let command_line = format_command(program, args);
        debug!("Running {}", command_line);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::CommandFailed {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        // The child is killed when the output future is dropped on expiry
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::CommandTimeout {
                command: command_line.clone(),
                timeout,
            })?
            .map_err(|e| Error::CommandFailed {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub(crate) fn format_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
