//! Credential resolution against real key fixtures and a fake agent socket.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hoist_cli::domain::ProvisionError;
use hoist_cli::infra::credentials::{AuthSource, CredentialResolver};
use tempfile::TempDir;
use tokio::net::UnixListener;

use crate::mocks::{CountingPrompt, fixture, public_blob, spawn_agent, spawn_counting_agent};

const PASSPHRASE: &str = "correct horse";

fn agent_socket(dir: &TempDir) -> (std::path::PathBuf, UnixListener) {
    let path = dir.path().join("agent.sock");
    let listener = UnixListener::bind(&path).expect("bind agent socket");
    (path, listener)
}

// ── No key path: agent only ───────────────────────────────────────────────────

#[tokio::test]
async fn test_no_key_and_no_agent_is_agent_unreachable() {
    let prompt = CountingPrompt::answering(PASSPHRASE);
    let resolver = CredentialResolver::new(None, &prompt);

    let err = resolver.resolve(None).await.unwrap_err();

    assert!(matches!(err, ProvisionError::AgentUnreachable { .. }), "got: {err}");
    assert_eq!(prompt.calls(), 0);
}

#[tokio::test]
async fn test_no_key_and_dead_socket_is_agent_unreachable() {
    let dir = TempDir::new().unwrap();
    let prompt = CountingPrompt::answering(PASSPHRASE);
    let resolver = CredentialResolver::new(Some(dir.path().join("missing.sock")), &prompt);

    let err = resolver.resolve(None).await.unwrap_err();

    assert!(matches!(err, ProvisionError::AgentUnreachable { .. }), "got: {err}");
    assert!(err.to_string().contains("missing.sock"));
}

#[tokio::test]
async fn test_no_key_uses_every_agent_identity() {
    let dir = TempDir::new().unwrap();
    let (socket, listener) = agent_socket(&dir);
    let agent = spawn_agent(
        listener,
        vec![public_blob("id_plain.pub"), public_blob("id_locked.pub")],
    );
    let prompt = CountingPrompt::answering(PASSPHRASE);
    let resolver = CredentialResolver::new(Some(socket), &prompt);

    let mut handle = resolver.resolve(None).await.expect("agent handle");

    assert_eq!(handle.source(), Some(AuthSource::Agent));
    assert_eq!(handle.agent_identities(), 2);
    assert_eq!(prompt.calls(), 0);
    handle.close();
    agent.abort();
}

async fn wait_for_hangups(hangups: &AtomicUsize, expected: usize) -> usize {
    for _ in 0..100 {
        if hangups.load(Ordering::SeqCst) >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    hangups.load(Ordering::SeqCst)
}

#[tokio::test]
async fn test_close_releases_agent_connection() {
    let dir = TempDir::new().unwrap();
    let (socket, listener) = agent_socket(&dir);
    let (agent, hangups) = spawn_counting_agent(listener, vec![public_blob("id_plain.pub")]);
    let prompt = CountingPrompt::answering(PASSPHRASE);

    let mut handle = CredentialResolver::new(Some(socket), &prompt)
        .resolve(None)
        .await
        .expect("agent handle");
    assert_eq!(hangups.load(Ordering::SeqCst), 0, "connection held while in use");

    handle.close();
    handle.close();

    assert_eq!(handle.source(), None);
    assert_eq!(wait_for_hangups(&hangups, 1).await, 1);
    agent.abort();
}

#[tokio::test]
async fn test_dropping_handle_releases_agent_connection() {
    let dir = TempDir::new().unwrap();
    let (socket, listener) = agent_socket(&dir);
    let (agent, hangups) = spawn_counting_agent(listener, vec![public_blob("id_plain.pub")]);
    let prompt = CountingPrompt::answering(PASSPHRASE);

    let handle = CredentialResolver::new(Some(socket), &prompt)
        .resolve(None)
        .await
        .expect("agent handle");
    drop(handle);

    assert_eq!(wait_for_hangups(&hangups, 1).await, 1);
    agent.abort();
}

#[tokio::test]
async fn test_empty_key_path_means_agent() {
    let prompt = CountingPrompt::answering(PASSPHRASE);
    let resolver = CredentialResolver::new(None, &prompt);

    let err = resolver
        .resolve(Some(std::path::Path::new("")))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::AgentUnreachable { .. }), "got: {err}");
}

// ── Key path: unencrypted and malformed keys ─────────────────────────────────

#[tokio::test]
async fn test_unencrypted_key_resolves_without_prompt() {
    let prompt = CountingPrompt::answering(PASSPHRASE);
    let resolver = CredentialResolver::new(None, &prompt);

    let handle = resolver
        .resolve(Some(&fixture("id_plain")))
        .await
        .expect("plain key");

    assert_eq!(handle.source(), Some(AuthSource::PrivateKey));
    assert_eq!(prompt.calls(), 0);
}

#[tokio::test]
async fn test_missing_key_file_is_key_read() {
    let dir = TempDir::new().unwrap();
    let prompt = CountingPrompt::answering(PASSPHRASE);
    let resolver = CredentialResolver::new(None, &prompt);

    let err = resolver
        .resolve(Some(&dir.path().join("id_nope")))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::KeyRead { .. }), "got: {err}");
    assert!(err.to_string().contains("id_nope"));
    assert_eq!(prompt.calls(), 0);
}

#[tokio::test]
async fn test_corrupt_key_fails_before_agent_and_prompt() {
    let dir = TempDir::new().unwrap();
    let (socket, listener) = agent_socket(&dir);
    let prompt = CountingPrompt::answering(PASSPHRASE);
    let resolver = CredentialResolver::new(Some(socket), &prompt);

    let err = resolver
        .resolve(Some(&fixture("id_corrupt")))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::KeyParse { .. }), "got: {err}");
    assert_eq!(prompt.calls(), 0);
    let dialed = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(dialed.is_err(), "agent must not be contacted for a corrupt key");
}

// ── Key path: encrypted keys ─────────────────────────────────────────────────

#[tokio::test]
async fn test_locked_key_without_agent_prompts_once() {
    let prompt = CountingPrompt::answering(PASSPHRASE);
    let resolver = CredentialResolver::new(None, &prompt);

    let handle = resolver
        .resolve(Some(&fixture("id_locked")))
        .await
        .expect("passphrase decrypts key");

    assert_eq!(handle.source(), Some(AuthSource::PrivateKey));
    assert_eq!(prompt.calls(), 1);
}

#[tokio::test]
async fn test_locked_key_wrong_passphrase_is_passphrase_parse() {
    let prompt = CountingPrompt::answering("battery staple");
    let resolver = CredentialResolver::new(None, &prompt);

    let err = resolver
        .resolve(Some(&fixture("id_locked")))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::PassphraseParse { .. }), "got: {err}");
    assert_eq!(prompt.calls(), 1);
}

#[tokio::test]
async fn test_broken_prompt_counts_as_empty_passphrase() {
    let prompt = CountingPrompt::broken();
    let resolver = CredentialResolver::new(None, &prompt);

    let err = resolver
        .resolve(Some(&fixture("id_locked")))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::PassphraseParse { .. }), "got: {err}");
    assert_eq!(prompt.calls(), 1);
}

#[tokio::test]
async fn test_locked_key_matching_agent_identity_skips_prompt() {
    let dir = TempDir::new().unwrap();
    let (socket, listener) = agent_socket(&dir);
    let agent = spawn_agent(
        listener,
        vec![public_blob("id_plain.pub"), public_blob("id_locked.pub")],
    );
    let prompt = CountingPrompt::answering(PASSPHRASE);
    let resolver = CredentialResolver::new(Some(socket), &prompt);

    let handle = resolver
        .resolve(Some(&fixture("id_locked")))
        .await
        .expect("agent identity");

    assert_eq!(handle.source(), Some(AuthSource::Agent));
    assert_eq!(handle.agent_identities(), 1);
    assert_eq!(prompt.calls(), 0);
    agent.abort();
}

#[tokio::test]
async fn test_locked_key_empty_agent_falls_through_to_prompt() {
    let dir = TempDir::new().unwrap();
    let (socket, listener) = agent_socket(&dir);
    let agent = spawn_agent(listener, Vec::new());
    let prompt = CountingPrompt::answering(PASSPHRASE);
    let resolver = CredentialResolver::new(Some(socket), &prompt);

    let handle = resolver
        .resolve(Some(&fixture("id_locked")))
        .await
        .expect("prompt fallback");

    assert_eq!(handle.source(), Some(AuthSource::PrivateKey));
    assert_eq!(prompt.calls(), 1);
    agent.abort();
}

#[tokio::test]
async fn test_locked_key_agent_without_match_falls_through_to_prompt() {
    let dir = TempDir::new().unwrap();
    let (socket, listener) = agent_socket(&dir);
    let agent = spawn_agent(listener, vec![public_blob("id_plain.pub")]);
    let prompt = CountingPrompt::answering(PASSPHRASE);
    let resolver = CredentialResolver::new(Some(socket), &prompt);

    let handle = resolver
        .resolve(Some(&fixture("id_locked")))
        .await
        .expect("prompt fallback");

    assert_eq!(handle.source(), Some(AuthSource::PrivateKey));
    assert_eq!(prompt.calls(), 1);
    agent.abort();
}

#[tokio::test]
async fn test_locked_key_dead_agent_falls_through_to_prompt() {
    let dir = TempDir::new().unwrap();
    let prompt = CountingPrompt::answering(PASSPHRASE);
    let resolver = CredentialResolver::new(Some(dir.path().join("gone.sock")), &prompt);

    let handle = resolver
        .resolve(Some(&fixture("id_locked")))
        .await
        .expect("prompt fallback");

    assert_eq!(handle.source(), Some(AuthSource::PrivateKey));
    assert_eq!(prompt.calls(), 1);
}
