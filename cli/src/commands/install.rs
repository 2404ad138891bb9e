//! `hoist install`: install k3s on a host and save its kubeconfig.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::application::ports::{CommandOperator, ProgressReporter};
use crate::application::services::provision::{
    KubeconfigTarget, ProvisionOutcome, ProvisionPlan, provision,
};
use crate::domain::install::{self, DEFAULT_CHANNEL, InstallOptions};
use crate::domain::{HoistConfig, HostKeyChecking, MergeStrategy};
use crate::infra::credentials::{CredentialResolver, TerminalPrompt};
use crate::infra::fs::PrivateFileWriter;
use crate::infra::merge::{InProcessMerger, KubectlMerger};
use crate::infra::operator::{HostKeyPolicy, LocalOperator, SshOperator};
use crate::output::{TerminalReporter, json};

/// Arguments for `hoist install`.
#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Public IP of the node
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub ip: IpAddr,

    /// Username for SSH login
    #[arg(long, env = "HOIST_SSH_USER")]
    pub user: Option<String>,

    /// Private key for SSH login; the SSH agent is used when omitted
    #[arg(long, env = "HOIST_SSH_KEY")]
    pub ssh_key: Option<String>,

    /// Port for SSH login
    #[arg(long)]
    pub ssh_port: Option<u16>,

    /// Use sudo for privileged commands (default)
    #[arg(long, overrides_with = "no_sudo")]
    pub sudo: bool,

    /// Run privileged commands without sudo
    #[arg(long, overrides_with = "sudo")]
    pub no_sudo: bool,

    /// Skip the install step and only fetch the kubeconfig
    #[arg(long)]
    pub skip_install: bool,

    /// Where to save the kubeconfig
    #[arg(long)]
    pub local_path: Option<String>,

    /// Context name written into the kubeconfig
    #[arg(long)]
    pub context: Option<String>,

    /// Disable the bundled servicelb and traefik
    #[arg(long)]
    pub no_extras: bool,

    /// Use the ipsec flannel backend
    #[arg(long)]
    pub ipsec: bool,

    /// Merge into an existing kubeconfig at --local-path
    #[arg(long)]
    pub merge: bool,

    /// Install on this machine instead of over SSH
    #[arg(long)]
    pub local: bool,

    /// Start an embedded etcd cluster
    #[arg(long)]
    pub cluster: bool,

    /// Print each command before running it
    #[arg(long)]
    pub print_command: bool,

    /// External datastore connection string
    #[arg(long)]
    pub datastore: Option<String>,

    /// Exact k3s version to install, e.g. v1.19.1+k3s1
    #[arg(long)]
    pub k3s_version: Option<String>,

    /// Extra arguments passed to the k3s server
    #[arg(long, default_value = "")]
    pub k3s_extra_args: String,

    /// Release channel when no version is given
    #[arg(long)]
    pub k3s_channel: Option<String>,

    /// TLS subject alternative name, defaults to --ip
    #[arg(long)]
    pub tls_san: Option<String>,

    /// Verify the server key against known_hosts
    #[arg(long)]
    pub strict_host_key: bool,

    /// Merge with `kubectl config view --flatten` instead of in process
    #[arg(long)]
    pub merge_with_kubectl: bool,
}

/// Everything `run` needs, resolved from flags and the defaults file.
#[derive(Debug, PartialEq)]
pub struct InstallSettings {
    /// Run through `LocalOperator` instead of SSH.
    pub local: bool,
    /// `host:port` to dial.
    pub address: String,
    /// Host written into the kubeconfig server URL.
    pub server_host: String,
    /// SSH login user.
    pub user: String,
    /// Private key path, tilde-expanded.
    pub key: Option<PathBuf>,
    /// Server key check.
    pub host_key: HostKeyPolicy,
    /// How `--merge` combines documents.
    pub merge_strategy: MergeStrategy,
    /// Absolute kubeconfig destination.
    pub local_path: PathBuf,
    /// Context name.
    pub context: String,
    /// Merge into an existing kubeconfig.
    pub merge: bool,
    /// Echo commands before running them.
    pub print_commands: bool,
    /// Install pipeline, `None` with `--skip-install`.
    pub install_command: Option<String>,
    /// Kubeconfig retrieval command.
    pub retrieval_command: String,
}

/// Combines CLI flags with the defaults file. Flags win.
///
/// # Errors
///
/// Returns an error if the install command cannot be built or the local
/// path cannot be made absolute.
pub fn resolve_settings(args: &InstallArgs, config: &HoistConfig) -> Result<InstallSettings> {
    let sudo = !args.no_sudo;
    let ip = args.ip.to_string();
    let channel = args
        .k3s_channel
        .clone()
        .or_else(|| Some(config.install.channel.clone()).filter(|c| !c.is_empty()))
        .or_else(|| Some(DEFAULT_CHANNEL.to_string()));

    let install_command = if args.skip_install {
        None
    } else {
        Some(install::install_command(&InstallOptions {
            cluster: args.cluster,
            ip: ip.clone(),
            tls_san: args.tls_san.clone(),
            datastore: args.datastore.clone(),
            flannel_ipsec: args.ipsec,
            no_extras: args.no_extras,
            extra_args: args.k3s_extra_args.clone(),
            version: args.k3s_version.clone(),
            channel,
            sudo,
        })?)
    };

    let port = args.ssh_port.unwrap_or(config.ssh.port);
    let server_host = match args.ip {
        IpAddr::V4(_) => ip,
        IpAddr::V6(_) => format!("[{ip}]"),
    };

    let key = args
        .ssh_key
        .as_deref()
        .or(config.ssh.key.as_deref())
        .filter(|k| !k.is_empty())
        .map(expand);

    let host_key = if args.strict_host_key
        || config.ssh.host_key_checking == HostKeyChecking::KnownHosts
    {
        HostKeyPolicy::KnownHosts(expand(&config.ssh.known_hosts))
    } else {
        HostKeyPolicy::AcceptAny
    };

    let merge_strategy = if args.merge_with_kubectl {
        MergeStrategy::Kubectl
    } else {
        config.install.merge_strategy
    };

    let local_path = args
        .local_path
        .as_deref()
        .unwrap_or(&config.install.local_path);
    let local_path = std::path::absolute(expand(local_path))
        .with_context(|| format!("cannot resolve path {local_path}"))?;

    Ok(InstallSettings {
        local: args.local,
        address: SocketAddr::new(args.ip, port).to_string(),
        server_host,
        user: args
            .user
            .clone()
            .unwrap_or_else(|| config.ssh.user.clone()),
        key,
        host_key,
        merge_strategy,
        local_path,
        context: args
            .context
            .clone()
            .unwrap_or_else(|| config.install.context.clone()),
        merge: args.merge,
        print_commands: args.print_command,
        install_command,
        retrieval_command: install::retrieval_command(sudo),
    })
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Summary printed with `--json`.
#[derive(Debug, Serialize)]
struct InstallReport<'a> {
    path: &'a Path,
    context: &'a str,
    merged: bool,
    target: &'a str,
}

/// Run `hoist install`.
///
/// # Errors
///
/// Returns an error if credentials cannot be resolved, the target cannot be
/// reached, or any provisioning step fails.
pub async fn run(app: &AppContext, args: &InstallArgs) -> Result<()> {
    let config = app.load_config()?;
    let settings = resolve_settings(args, &config)?;
    let reporter = TerminalReporter::new(&app.output);

    let outcome = if settings.local {
        let mut operator = LocalOperator::new();
        let result = run_plan(&operator, &settings, &reporter).await;
        operator.close().await?;
        result?
    } else {
        provision_remote(&settings, &reporter).await?
    };

    let target = if settings.local {
        "local"
    } else {
        settings.address.as_str()
    };
    if app.is_json() {
        return json::print(&InstallReport {
            path: &outcome.path,
            context: &outcome.context,
            merged: outcome.merged,
            target,
        });
    }

    let path = outcome.path.display();
    app.output.info(&format!("Saving file to: {path}"));
    app.output.kv("Context:", &outcome.context);
    app.output.shell_hint("# Test your cluster with:");
    app.output.shell_hint(&format!("export KUBECONFIG={path}"));
    app.output
        .shell_hint(&format!("kubectl config use-context {}", outcome.context));
    app.output.shell_hint("kubectl get node -o wide");
    Ok(())
}

/// Resolves credentials, opens the SSH session and provisions. The
/// operator and the credential are released on every path.
async fn provision_remote(
    settings: &InstallSettings,
    reporter: &impl ProgressReporter,
) -> Result<ProvisionOutcome> {
    let resolver = CredentialResolver::from_env(TerminalPrompt);
    let mut auth = resolver.resolve(settings.key.as_deref()).await?;
    tracing::info!(source = ?auth.source(), "ssh credential resolved");

    let result = match SshOperator::open(
        &settings.address,
        &settings.user,
        &mut auth,
        settings.host_key.clone(),
    )
    .await
    {
        Ok(mut operator) => {
            let result = run_plan(&operator, settings, reporter).await;
            let closed = operator.close().await;
            match (result, closed) {
                (Ok(outcome), Ok(())) => Ok(outcome),
                (Ok(_), Err(e)) => Err(e.into()),
                (Err(e), closed) => {
                    if let Err(close_err) = closed {
                        tracing::warn!("closing ssh session failed: {close_err}");
                    }
                    Err(e)
                }
            }
        }
        Err(e) => Err(e.into()),
    };
    auth.close();
    result
}

async fn run_plan(
    operator: &impl CommandOperator,
    settings: &InstallSettings,
    reporter: &impl ProgressReporter,
) -> Result<ProvisionOutcome> {
    let plan = ProvisionPlan {
        install_command: settings.install_command.as_deref(),
        retrieval_command: &settings.retrieval_command,
        print_commands: settings.print_commands,
        target: KubeconfigTarget {
            address: &settings.server_host,
            context: &settings.context,
            local_path: &settings.local_path,
            merge: settings.merge,
        },
    };
    let writer = PrivateFileWriter;
    match settings.merge_strategy {
        MergeStrategy::InProcess => {
            provision(operator, &InProcessMerger, &writer, reporter, &plan).await
        }
        MergeStrategy::Kubectl => {
            provision(operator, &KubectlMerger::default(), &writer, reporter, &plan).await
        }
    }
}
