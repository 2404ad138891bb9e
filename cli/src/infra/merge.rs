//! Kubeconfig merge backends: implementations of the `ConfigMerger` port.
//!
//! `InProcessMerger` merges the YAML documents directly. `KubectlMerger`
//! delegates to `kubectl config view --merge --flatten` through a temporary
//! file and the `KUBECONFIG` search list.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::application::ports::{ConfigMerger, MergedDocument};
use crate::domain::ProvisionError;
use crate::domain::kubeconfig::merge_documents;

/// Prefix of the temporary file handed to the external merge tool.
pub const TEMP_PREFIX: &str = "k3s-temp-";

/// Merges kubeconfigs in process with `serde_yaml`.
#[derive(Debug, Default)]
pub struct InProcessMerger;

impl ConfigMerger for InProcessMerger {
    async fn merge(
        &self,
        existing: &Path,
        document: &[u8],
    ) -> Result<MergedDocument, ProvisionError> {
        let current = match tokio::fs::read(existing).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %existing.display(), "no existing kubeconfig, nothing to merge");
                Vec::new()
            }
            Err(source) => {
                return Err(ProvisionError::ConfigRead {
                    path: existing.to_path_buf(),
                    source,
                });
            }
        };
        tracing::info!(path = %existing.display(), "merging kubeconfig in process");
        Ok(MergedDocument::clean(merge_documents(&current, document)?))
    }
}

/// Merges kubeconfigs by running `kubectl config view --merge --flatten`.
#[derive(Debug)]
pub struct KubectlMerger {
    program: PathBuf,
    temp_dir: PathBuf,
}

impl Default for KubectlMerger {
    fn default() -> Self {
        Self::new("kubectl", std::env::temp_dir())
    }
}

impl KubectlMerger {
    /// Creates a merger running `program`, with its temp file in `temp_dir`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            temp_dir: temp_dir.into(),
        }
    }
}

impl ConfigMerger for KubectlMerger {
    async fn merge(
        &self,
        existing: &Path,
        document: &[u8],
    ) -> Result<MergedDocument, ProvisionError> {
        let tool_error = |reason: String| ProvisionError::MergeTool { reason };

        // The guard deletes the file on drop, so early returns leave nothing behind.
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.temp_dir)
            .map_err(|e| {
                tool_error(format!(
                    "could not create a temporary file to store the kubeconfig: {e}"
                ))
            })?;
        if let Err(e) = temp.write_all(document).and_then(|()| temp.flush()) {
            return Err(tool_error(format!(
                "could not write {}: {e}",
                temp.path().display()
            )));
        }

        let search_list = std::env::join_paths([existing, temp.path()])
            .map_err(|e| tool_error(format!("invalid KUBECONFIG entry: {e}")))?;
        tracing::info!(
            path = %existing.display(),
            tool = %self.program.display(),
            "merging kubeconfig with external tool"
        );

        let output = tokio::process::Command::new(&self.program)
            .args(["config", "view", "--merge", "--flatten"])
            .env("KUBECONFIG", &search_list)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| tool_error(format!("failed to run {}: {e}", self.program.display())))?;
        if !output.status.success() {
            return Err(tool_error(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let temp_path = temp.path().to_path_buf();
        let cleanup_error = temp
            .close()
            .err()
            .map(|source| ProvisionError::TempCleanup {
                path: temp_path,
                source,
            });
        Ok(MergedDocument {
            document: output.stdout,
            cleanup_error,
        })
    }
}
