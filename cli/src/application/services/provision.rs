//! Application service: install k3s and fetch its kubeconfig.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.
//! All I/O is routed through injected port traits, so the same flow drives
//! both the local and the SSH operator.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::application::ports::{CommandOperator, ConfigMerger, ConfigWriter, ProgressReporter};
use crate::domain::kubeconfig::{DEFAULT_CONTEXT, rewrite};

/// Where and how the retrieved kubeconfig is stored.
pub struct KubeconfigTarget<'a> {
    /// Address written into the kubeconfig in place of the loopback address.
    pub address: &'a str,
    /// Context name written in place of `default`.
    pub context: &'a str,
    /// Absolute destination path.
    pub local_path: &'a Path,
    /// Merge with an existing kubeconfig at `local_path`.
    pub merge: bool,
}

/// Commands to run and what to do with the result.
pub struct ProvisionPlan<'a> {
    /// Install pipeline, or `None` to skip installation.
    pub install_command: Option<&'a str>,
    /// Command that prints the generated kubeconfig.
    pub retrieval_command: &'a str,
    /// Echo each command before running it.
    pub print_commands: bool,
    /// Kubeconfig destination.
    pub target: KubeconfigTarget<'a>,
}

/// Outcome of a successful provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// Where the kubeconfig was written.
    pub path: PathBuf,
    /// Context name used in the kubeconfig.
    pub context: String,
    /// Whether an existing kubeconfig was merged.
    pub merged: bool,
}

/// Runs the install command (unless skipped), then retrieves, rewrites,
/// optionally merges and saves the kubeconfig.
///
/// Nothing is rolled back on failure: a completed install stays installed.
///
/// # Errors
///
/// Returns the first `ProvisionError` raised by the operator, merger or
/// writer, with context naming the failed step.
pub async fn provision(
    operator: &impl CommandOperator,
    merger: &impl ConfigMerger,
    writer: &impl ConfigWriter,
    reporter: &impl ProgressReporter,
    plan: &ProvisionPlan<'_>,
) -> Result<ProvisionOutcome> {
    if let Some(install) = plan.install_command {
        if plan.print_commands {
            reporter.step(&format!("command: {}", install.trim_end()));
        }
        reporter.step("Installing k3s...");
        let res = operator
            .execute(install)
            .await
            .context("k3s install failed")?;
        log_output("install", &res.stdout, &res.stderr);
        reporter.success("k3s installed");
    }

    if plan.print_commands {
        reporter.step(&format!("command: {}", plan.retrieval_command.trim_end()));
    }
    obtain_kubeconfig(
        operator,
        merger,
        writer,
        reporter,
        plan.retrieval_command,
        &plan.target,
    )
    .await
}

/// Retrieves the kubeconfig with `retrieval_command` and stores it at
/// `target.local_path`.
///
/// # Errors
///
/// Returns an error if retrieval, merging or writing fails.
pub async fn obtain_kubeconfig(
    operator: &impl CommandOperator,
    merger: &impl ConfigMerger,
    writer: &impl ConfigWriter,
    reporter: &impl ProgressReporter,
    retrieval_command: &str,
    target: &KubeconfigTarget<'_>,
) -> Result<ProvisionOutcome> {
    reporter.step("Fetching kubeconfig...");
    let res = operator
        .execute(retrieval_command)
        .await
        .context("kubeconfig retrieval failed")?;
    log_output("retrieve", &res.stdout, &res.stderr);

    let mut document = rewrite(&res.stdout, target.address, target.context);

    if target.merge {
        reporter.step(&format!(
            "Merging with existing kubeconfig at {}",
            target.local_path.display()
        ));
        let merged = merger.merge(target.local_path, &document).await?;
        if let Some(cleanup) = merged.cleanup_error {
            reporter.warn(&cleanup.to_string());
        }
        document = merged.document;
    }

    writer.write_private(target.local_path, &document)?;
    reporter.success(&format!("Saved kubeconfig to {}", target.local_path.display()));

    let context = if target.context.is_empty() {
        DEFAULT_CONTEXT
    } else {
        target.context
    };
    Ok(ProvisionOutcome {
        path: target.local_path.to_path_buf(),
        context: context.to_string(),
        merged: target.merge,
    })
}

fn log_output(step: &str, stdout: &[u8], stderr: &[u8]) {
    if !stdout.is_empty() {
        tracing::debug!(step, stdout = %String::from_utf8_lossy(stdout).trim_end(), "command output");
    }
    if !stderr.is_empty() {
        tracing::debug!(step, stderr = %String::from_utf8_lossy(stderr).trim_end(), "command output");
    }
}
