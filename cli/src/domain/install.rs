//! k3s install and kubeconfig retrieval command construction.
//!
//! Pure string building. The resulting commands are handed to a
//! `CommandOperator` as opaque text.

use anyhow::Result;

/// Installer script fetched on the target host.
pub const INSTALL_SCRIPT: &str = "curl -sfL https://get.k3s.io";

/// Where k3s writes the generated kubeconfig on the target host.
pub const REMOTE_KUBECONFIG: &str = "/etc/rancher/k3s/k3s.yaml";

/// Release channel used when neither a version nor a channel is configured.
pub const DEFAULT_CHANNEL: &str = "v1.18";

/// Options that shape the `INSTALL_K3S_EXEC` server arguments.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Form an embedded-etcd cluster (`--cluster-init`).
    pub cluster: bool,
    /// Public address of the node; used as TLS SAN unless `tls_san` is set.
    pub ip: String,
    /// Optional TLS subject alternative name override.
    pub tls_san: Option<String>,
    /// External datastore connection string.
    pub datastore: Option<String>,
    /// Use the `ipsec` flannel backend.
    pub flannel_ipsec: bool,
    /// Disable the bundled `servicelb` and `traefik`.
    pub no_extras: bool,
    /// Extra arguments appended verbatim.
    pub extra_args: String,
    /// Exact k3s version; takes precedence over `channel`.
    pub version: Option<String>,
    /// Release channel, e.g. `stable`, `latest`, `v1.18`.
    pub channel: Option<String>,
    /// Prefix privileged commands with `sudo`.
    pub sudo: bool,
}

/// Rejects datastore strings the k3s installer does not accept.
///
/// # Errors
///
/// Returns an error if the string contains `ssl-mode=REQUIRED`, or names a
/// MySQL datastore without a `tcp(host:port)` address.
pub fn validate_datastore(datastore: &str) -> Result<()> {
    if datastore.is_empty() {
        return Ok(());
    }
    anyhow::ensure!(
        !datastore.contains("ssl-mode=REQUIRED"),
        "remove ssl-mode=REQUIRED from your datastore string, it is not supported by the k3s syntax"
    );
    anyhow::ensure!(
        !datastore.contains("mysql") || datastore.contains("tcp"),
        "you must specify the mysql host as tcp(host:port) or tcp(ip:port), \
         see the k3s docs for more: https://rancher.com/docs/k3s/latest/en/installation/ha"
    );
    Ok(())
}

/// Builds the quoted `INSTALL_K3S_EXEC='server ...'` assignment.
#[must_use]
pub fn install_exec(opts: &InstallOptions) -> String {
    let mut extras: Vec<&str> = Vec::new();
    let datastore_flag;
    if let Some(ds) = opts.datastore.as_deref().filter(|d| !d.is_empty()) {
        datastore_flag = format!("--datastore-endpoint {ds}");
        extras.push(&datastore_flag);
    }
    if opts.flannel_ipsec {
        extras.push("--flannel-backend ipsec");
    }
    if opts.no_extras {
        extras.push("--no-deploy servicelb");
        extras.push("--no-deploy traefik");
    }
    extras.push(&opts.extra_args);

    let mut exec = String::from("INSTALL_K3S_EXEC='server");
    if opts.cluster {
        exec.push_str(" --cluster-init");
    }
    let san = opts
        .tls_san
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(&opts.ip);
    exec.push_str(" --tls-san ");
    exec.push_str(san);

    let extras = extras.join(" ");
    let extras = extras.trim();
    if !extras.is_empty() {
        exec.push(' ');
        exec.push_str(extras);
    }
    exec.push('\'');
    exec
}

/// Builds the `INSTALL_K3S_VERSION` / `INSTALL_K3S_CHANNEL` assignment.
///
/// # Errors
///
/// Returns an error if neither a version nor a channel is set.
pub fn version_selector(version: Option<&str>, channel: Option<&str>) -> Result<String> {
    match (
        version.filter(|v| !v.is_empty()),
        channel.filter(|c| !c.is_empty()),
    ) {
        (Some(v), _) => Ok(format!("INSTALL_K3S_VERSION='{v}'")),
        (None, Some(c)) => Ok(format!("INSTALL_K3S_CHANNEL='{c}'")),
        (None, None) => anyhow::bail!("give a value for --k3s-version or --k3s-channel"),
    }
}

/// Builds the full install pipeline run on the target host.
///
/// # Errors
///
/// Returns an error if the datastore is rejected or no version/channel is set.
pub fn install_command(opts: &InstallOptions) -> Result<String> {
    if let Some(ds) = &opts.datastore {
        validate_datastore(ds)?;
    }
    let selector = version_selector(opts.version.as_deref(), opts.channel.as_deref())?;
    Ok(format!(
        "{INSTALL_SCRIPT} | {} {selector} sh -\n",
        install_exec(opts)
    ))
}

/// Builds the command that streams the generated kubeconfig to stdout.
#[must_use]
pub fn retrieval_command(sudo: bool) -> String {
    let prefix = if sudo { "sudo " } else { "" };
    format!("{prefix}cat {REMOTE_KUBECONFIG}\n")
}

// ── Unit tests ───────────────────────────────────────────────────────────────
