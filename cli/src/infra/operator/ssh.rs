//! `SshOperator`: runs commands on a remote host over one SSH connection.
//!
//! Every `execute` opens its own session channel so a failed command never
//! leaves state behind for the next one.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;

use crate::application::ports::{CommandOperator, ExecutionResult};
use crate::domain::ProvisionError;
use crate::infra::credentials::AuthHandle;

/// SSH extended-data stream number for stderr (RFC 4254 §5.2).
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// How the server's host key is checked during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept any host key. Intended for first contact with freshly
    /// provisioned hosts whose keys are not yet known.
    AcceptAny,
    /// Require the key to be present in the given `known_hosts` file.
    KnownHosts(PathBuf),
}

struct HostKeyVerifier {
    policy: HostKeyPolicy,
    host: String,
    port: u16,
}

#[async_trait]
impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let HostKeyPolicy::KnownHosts(path) = &self.policy else {
            return Ok(true);
        };
        match russh_keys::check_known_hosts_path(&self.host, self.port, server_public_key, path) {
            Ok(true) => Ok(true),
            Ok(false) => {
                tracing::warn!(
                    host = %self.host,
                    known_hosts = %path.display(),
                    fingerprint = %server_public_key.fingerprint(),
                    "host key not found in known_hosts"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(host = %self.host, "host key verification failed: {e}");
                Ok(false)
            }
        }
    }
}

/// Production `CommandOperator` for a remote host.
pub struct SshOperator {
    address: String,
    session: Option<client::Handle<HostKeyVerifier>>,
}

impl SshOperator {
    /// Connects to `address` (`host:port`) and authenticates `user` with `auth`.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Connect` if the address is malformed, the
    /// transport cannot be established, or the server rejects every key.
    pub async fn open(
        address: &str,
        user: &str,
        auth: &mut AuthHandle,
        policy: HostKeyPolicy,
    ) -> Result<Self, ProvisionError> {
        let (host, port) = split_address(address)?;
        if policy == HostKeyPolicy::AcceptAny {
            tracing::warn!(%address, "host key verification disabled, accepting any server key");
        }
        let verifier = HostKeyVerifier {
            policy,
            host,
            port,
        };
        let config = Arc::new(client::Config::default());

        let mut session = client::connect(config, address, verifier)
            .await
            .map_err(|e| ProvisionError::connect(address, e))?;
        let accepted = auth
            .authenticate(&mut session, user)
            .await
            .map_err(|e| ProvisionError::connect(address, e))?;
        if !accepted {
            return Err(ProvisionError::connect(
                address,
                format!("authentication rejected for user {user}"),
            ));
        }

        tracing::info!(%address, %user, "ssh connection established");
        Ok(Self {
            address: address.to_string(),
            session: Some(session),
        })
    }

    /// The `host:port` this operator is bound to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl CommandOperator for SshOperator {
    async fn execute(&self, command: &str) -> Result<ExecutionResult, ProvisionError> {
        let session = self.session.as_ref().ok_or(ProvisionError::OperatorClosed)?;
        tracing::debug!(address = %self.address, command = command.trim_end(), "executing over ssh");

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ProvisionError::execution(command, e, &[]))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ProvisionError::execution(command, e, &[]))?;

        let mut result = ExecutionResult::default();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => result.stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                    result.stderr.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        match exit_status {
            Some(0) => {
                tracing::debug!(
                    stdout_bytes = result.stdout.len(),
                    stderr_bytes = result.stderr.len(),
                    "remote command finished"
                );
                Ok(result)
            }
            Some(code) => Err(ProvisionError::execution(
                command,
                format!("process exited with status {code}"),
                &result.stderr,
            )),
            None => Err(ProvisionError::execution(
                command,
                "session closed without an exit status",
                &result.stderr,
            )),
        }
    }

    async fn close(&mut self) -> Result<(), ProvisionError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| ProvisionError::connect(&self.address, e))?;
        tracing::info!(address = %self.address, "ssh connection closed");
        Ok(())
    }
}

/// Splits `host:port`, accepting bracketed IPv6 hosts (`[::1]:22`).
fn split_address(address: &str) -> Result<(String, u16), ProvisionError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| ProvisionError::connect(address, "address must be host:port"))?;
    let port = port
        .parse::<u16>()
        .map_err(|e| ProvisionError::connect(address, format!("invalid port: {e}")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ProvisionError::connect(address, "missing host"));
    }
    Ok((host.to_string(), port))
}
