//! `LocalOperator`: runs commands through the local shell.
//!
//! No timeout is imposed: a hung command blocks the caller, matching the
//! remote operator.

use std::process::Stdio;

use crate::application::ports::{CommandOperator, ExecutionResult};
use crate::domain::ProvisionError;

/// Production `CommandOperator` for installs on this machine.
#[derive(Debug, Default)]
pub struct LocalOperator {
    closed: bool,
}

impl LocalOperator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(not(windows))]
fn shell(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

impl CommandOperator for LocalOperator {
    async fn execute(&self, command: &str) -> Result<ExecutionResult, ProvisionError> {
        if self.closed {
            return Err(ProvisionError::OperatorClosed);
        }
        tracing::debug!(command = command.trim_end(), "executing locally");

        // stdin stays attached so `sudo` inside the install script can prompt.
        let output = shell(command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProvisionError::execution(command, e, &[]))?;

        if !output.status.success() {
            return Err(ProvisionError::execution(
                command,
                output.status,
                &output.stderr,
            ));
        }
        tracing::debug!(
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "local command finished"
        );
        Ok(ExecutionResult {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn close(&mut self) -> Result<(), ProvisionError> {
        self.closed = true;
        Ok(())
    }
}
