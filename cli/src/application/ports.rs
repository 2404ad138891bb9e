//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain`, never from `crate::infra`,
//! `crate::commands`, or `crate::output`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::domain::{HoistConfig, ProvisionError};

// ── Value Types ───────────────────────────────────────────────────────────────

/// Captured output of one executed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Bytes written to standard output.
    pub stdout: Vec<u8>,
    /// Bytes written to standard error.
    pub stderr: Vec<u8>,
}

/// Result of a kubeconfig merge.
#[derive(Debug)]
pub struct MergedDocument {
    /// The combined kubeconfig.
    pub document: Vec<u8>,
    /// Set when the merge succeeded but its temporary file could not be
    /// removed. The document is still valid.
    pub cleanup_error: Option<ProvisionError>,
}

impl MergedDocument {
    /// A merge result with nothing left to clean up.
    #[must_use]
    pub fn clean(document: Vec<u8>) -> Self {
        Self {
            document,
            cleanup_error: None,
        }
    }
}

// ── Command Operator Port ─────────────────────────────────────────────────────

/// Executes command strings on a target, local or remote.
///
/// An operator is open from construction until `close`. After `close`,
/// `execute` must return `ProvisionError::OperatorClosed` without touching
/// any process or connection.
#[allow(async_fn_in_trait)]
pub trait CommandOperator {
    /// Run `command` through the target's shell and capture both streams.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Execution` if the command cannot be run or
    /// exits non-zero, and `ProvisionError::OperatorClosed` after `close`.
    async fn execute(&self, command: &str) -> Result<ExecutionResult, ProvisionError>;

    /// Release the underlying session. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to shut down cleanly.
    async fn close(&mut self) -> Result<(), ProvisionError>;
}

// ── Credential Ports ──────────────────────────────────────────────────────────

/// Reads a private-key passphrase from the user.
pub trait PassphrasePrompt {
    /// Ask for the passphrase of `key_path` without echoing input.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal cannot be read. Callers treat this
    /// as an empty passphrase.
    fn passphrase(&self, key_path: &Path) -> Result<String>;
}

// ── Config Post-Processing Ports ──────────────────────────────────────────────

/// Combines a freshly retrieved kubeconfig with one already on disk.
#[allow(async_fn_in_trait)]
pub trait ConfigMerger {
    /// Merge `document` into the kubeconfig at `existing`, returning the
    /// combined document. The file at `existing` is not modified.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::MergeTool`, `ConfigRead` or `ConfigDocument` depending on
    /// the implementation. Temp-file cleanup failures are reported in
    /// `MergedDocument::cleanup_error` instead.
    async fn merge(&self, existing: &Path, document: &[u8])
    -> Result<MergedDocument, ProvisionError>;
}

/// Persists the final kubeconfig.
pub trait ConfigWriter {
    /// Write `data` to `path` readable and writable by the owner only.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Persist` if the file cannot be written.
    fn write_private(&self, path: &Path, data: &[u8]) -> Result<(), ProvisionError>;
}

/// Abstracts loading of the Hoist defaults file.
pub trait ConfigStore {
    /// Load the configuration, returning defaults if no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    fn load(&self) -> Result<HoistConfig>;
    /// Path of the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    fn path(&self) -> Result<PathBuf>;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait, no async needed.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}
