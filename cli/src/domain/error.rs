//! Typed domain error enum.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, or any SSH crate. Transport failures are
//! carried as rendered strings so the domain stays independent of them.
//! All variants convert to `anyhow::Error` via the `?` operator.

use std::path::PathBuf;

use thiserror::Error;

/// Every failure the provisioning core can surface.
#[derive(Debug, Error)]
pub enum ProvisionError {
    // ── Credential resolution ────────────────────────────────────────────────
    #[error("unable to reach SSH agent: {reason}")]
    AgentUnreachable { reason: String },

    #[error("unable to read key file {}: {source}", .path.display())]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse private key {}: {reason}", .path.display())]
    KeyParse { path: PathBuf, reason: String },

    #[error("parse private key {} with passphrase failed: {reason}", .path.display())]
    PassphraseParse { path: PathBuf, reason: String },

    // ── Command operators ────────────────────────────────────────────────────
    #[error("unable to connect to {address} over ssh: {reason}")]
    Connect { address: String, reason: String },

    #[error("error received processing command {command:?}: {reason}{}", stderr_suffix(.stderr))]
    Execution {
        command: String,
        reason: String,
        stderr: String,
    },

    #[error("operator is closed")]
    OperatorClosed,

    // ── Config post-processing ───────────────────────────────────────────────
    #[error("could not merge kubeconfigs: {reason}")]
    MergeTool { reason: String },

    #[error("could not remove temporary kubeconfig file {}: {source}", .path.display())]
    TempCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to read existing kubeconfig {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid kubeconfig document ({origin}): {reason}")]
    ConfigDocument { origin: String, reason: String },

    #[error("unable to write {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\nstderr: {trimmed}")
    }
}

impl ProvisionError {
    /// Builds a `Connect` error from any displayable transport failure.
    pub fn connect(address: &str, reason: impl std::fmt::Display) -> Self {
        Self::Connect {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Builds an `Execution` error for `command`.
    pub fn execution(command: &str, reason: impl std::fmt::Display, stderr: &[u8]) -> Self {
        Self::Execution {
            command: command.trim_end().to_string(),
            reason: reason.to_string(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
        }
    }

    /// Stable machine-readable identifier, used in `--json` error output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AgentUnreachable { .. } => "AGENT_UNREACHABLE",
            Self::KeyRead { .. } => "KEY_READ",
            Self::KeyParse { .. } => "KEY_PARSE",
            Self::PassphraseParse { .. } => "PASSPHRASE_PARSE",
            Self::Connect { .. } => "CONNECT",
            Self::Execution { .. } => "EXECUTION",
            Self::OperatorClosed => "OPERATOR_CLOSED",
            Self::MergeTool { .. } => "MERGE_TOOL",
            Self::TempCleanup { .. } => "TEMP_CLEANUP",
            Self::ConfigRead { .. } => "CONFIG_READ",
            Self::ConfigDocument { .. } => "CONFIG_DOCUMENT",
            Self::Persist { .. } => "PERSIST",
        }
    }
}
