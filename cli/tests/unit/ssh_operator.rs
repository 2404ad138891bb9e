//! SSH operator behaviour: connect failures, and command execution against
//! an in-process server with scripted exec replies.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use hoist_cli::application::ports::CommandOperator;
use hoist_cli::domain::ProvisionError;
use hoist_cli::infra::credentials::{AuthHandle, CredentialResolver};
use hoist_cli::infra::operator::{HostKeyPolicy, SshOperator};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::key::PublicKey;
use tokio::net::TcpListener;

use crate::mocks::{CountingPrompt, fixture};

async fn plain_key() -> AuthHandle {
    let prompt = CountingPrompt::broken();
    CredentialResolver::new(None, &prompt)
        .resolve(Some(&fixture("id_plain")))
        .await
        .expect("plain key")
}

#[tokio::test]
async fn test_open_refused_port_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    let mut auth = plain_key().await;

    let err = SshOperator::open(&address, "root", &mut auth, HostKeyPolicy::AcceptAny)
        .await
        .err()
        .expect("nothing listens");

    assert!(matches!(err, ProvisionError::Connect { .. }), "got: {err}");
    assert!(err.to_string().contains(&address));
}

#[tokio::test]
async fn test_open_peer_hangs_up_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    let mut auth = plain_key().await;

    let err = SshOperator::open(&address, "root", &mut auth, HostKeyPolicy::AcceptAny)
        .await
        .err()
        .expect("handshake cannot complete");

    assert!(matches!(err, ProvisionError::Connect { .. }), "got: {err}");
    server.abort();
}

#[tokio::test]
async fn test_open_malformed_address_is_connect_error() {
    let mut auth = plain_key().await;

    let err = SshOperator::open("no-port-here", "root", &mut auth, HostKeyPolicy::AcceptAny)
        .await
        .err()
        .expect("address has no port");

    assert!(matches!(err, ProvisionError::Connect { .. }), "got: {err}");
}

// ── Scripted server ───────────────────────────────────────────────────────────

/// Accepts any public key and answers each exec request from a fixed script.
struct ScriptedShell;

#[async_trait]
impl server::Handler for ScriptedShell {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        _user: &str,
        _public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match data {
            b"cat kubeconfig" => {
                session.data(channel, CryptoVec::from_slice(b"apiVersion: v1\n"));
                session.extended_data(channel, 1, CryptoVec::from_slice(b"warming up\n"));
                session.exit_status_request(channel, 0);
            }
            b"false" => {
                session.extended_data(channel, 1, CryptoVec::from_slice(b"install script failed\n"));
                session.exit_status_request(channel, 3);
            }
            // Anything else ends without an exit status.
            _ => {}
        }
        session.eof(channel);
        session.close(channel);
        Ok(())
    }
}

/// Starts the scripted server on an ephemeral port and returns its address.
async fn spawn_server() -> (String, tokio::task::JoinHandle<()>) {
    let host_key = std::fs::read_to_string(fixture("id_plain")).expect("host key fixture");
    let config = Arc::new(server::Config {
        keys: vec![russh_keys::decode_secret_key(&host_key, None).expect("host key parses")],
        ..Default::default()
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                if let Ok(running) = server::run_stream(config, stream, ScriptedShell).await {
                    let _ = running.await;
                }
            });
        }
    });
    (address, task)
}

async fn connected_operator(address: &str) -> SshOperator {
    let mut auth = plain_key().await;
    SshOperator::open(address, "root", &mut auth, HostKeyPolicy::AcceptAny)
        .await
        .expect("connect to scripted server")
}

#[tokio::test]
async fn test_execute_separates_stdout_and_stderr() {
    let (address, server) = spawn_server().await;
    let mut op = connected_operator(&address).await;

    let res = op.execute("cat kubeconfig").await.expect("exit status 0");

    assert_eq!(res.stdout, b"apiVersion: v1\n");
    assert_eq!(res.stderr, b"warming up\n");
    op.close().await.expect("close");
    server.abort();
}

#[tokio::test]
async fn test_execute_non_zero_exit_is_execution_error_with_stderr() {
    let (address, server) = spawn_server().await;
    let mut op = connected_operator(&address).await;

    let err = op.execute("false").await.expect_err("exit status 3");

    match &err {
        ProvisionError::Execution { reason, stderr, .. } => {
            assert!(reason.contains('3'), "got: {err}");
            assert!(stderr.contains("install script failed"), "got: {err}");
        }
        other => panic!("expected Execution, got: {other}"),
    }
    op.close().await.expect("close");
    server.abort();
}

#[tokio::test]
async fn test_execute_without_exit_status_is_execution_error() {
    let (address, server) = spawn_server().await;
    let mut op = connected_operator(&address).await;

    let err = op.execute("vanish").await.expect_err("no exit status");

    assert!(matches!(err, ProvisionError::Execution { .. }), "got: {err}");
    op.close().await.expect("close");
    server.abort();
}

#[tokio::test]
async fn test_failed_command_does_not_break_next_execute() {
    let (address, server) = spawn_server().await;
    let mut op = connected_operator(&address).await;

    op.execute("false").await.expect_err("first command fails");
    let res = op.execute("cat kubeconfig").await.expect("fresh channel");

    assert_eq!(res.stdout, b"apiVersion: v1\n");
    op.close().await.expect("close");
    let err = op.execute("cat kubeconfig").await.expect_err("closed");
    assert!(matches!(err, ProvisionError::OperatorClosed));
    server.abort();
}
