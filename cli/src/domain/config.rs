//! Domain types for Hoist configuration.
//!
//! Pure functions only, no I/O.

use serde::{Deserialize, Serialize};

use crate::domain::install::DEFAULT_CHANNEL;
use crate::domain::kubeconfig::DEFAULT_CONTEXT;

// ── Config schema ────────────────────────────────────────────────────────────

/// Top-level configuration stored in `~/.hoist/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct HoistConfig {
    /// SSH connection defaults.
    pub ssh: SshConfig,
    /// Install and kubeconfig defaults.
    pub install: InstallConfig,
}

/// SSH connection defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SshConfig {
    /// Login user on the target host.
    pub user: String,
    /// SSH port on the target host.
    pub port: u16,
    /// Private key path; `None` means authenticate through the SSH agent.
    pub key: Option<String>,
    /// Server host key policy.
    pub host_key_checking: HostKeyChecking,
    /// `known_hosts` file consulted when `host_key_checking` is `known-hosts`.
    pub known_hosts: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            key: None,
            host_key_checking: HostKeyChecking::default(),
            known_hosts: "~/.ssh/known_hosts".to_string(),
        }
    }
}

/// How the SSH transport treats the server's host key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyChecking {
    /// Accept whatever key the host presents (freshly provisioned hosts).
    #[default]
    AcceptAny,
    /// Require the key to be listed in `known_hosts`.
    KnownHosts,
}

/// Install and kubeconfig defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallConfig {
    /// k3s release channel.
    pub channel: String,
    /// Context name written into the kubeconfig.
    pub context: String,
    /// Local path the kubeconfig is saved to.
    pub local_path: String,
    /// How `--merge` combines kubeconfigs.
    pub merge_strategy: MergeStrategy,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            context: DEFAULT_CONTEXT.to_string(),
            local_path: "kubeconfig".to_string(),
            merge_strategy: MergeStrategy::default(),
        }
    }
}

/// Kubeconfig merge backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Merge the YAML documents in process.
    #[default]
    InProcess,
    /// Shell out to `kubectl config view --merge --flatten`.
    Kubectl,
}

// ── Unit tests ───────────────────────────────────────────────────────────────
