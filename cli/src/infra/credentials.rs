//! SSH credential resolution: turns an optional private-key path into an
//! [`AuthHandle`] the SSH transport can authenticate with.
//!
//! Resolution is an ordered chain of steps. Each step either resolves a
//! handle, asks the chain to continue, or fails the whole resolution:
//!
//! 1. no key path: every identity held by the SSH agent
//! 2. key path, unencrypted key: the parsed key
//! 3. key path, encrypted key: the agent identity matching `<key>.pub`
//! 4. key path, encrypted key: the key decrypted with a prompted passphrase
//!
//! Only step 3 absorbs its own failures. Any key parse error other than
//! "passphrase required" is fatal before the agent or the prompt is touched.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use russh_keys::PublicKeyBase64 as _;
use russh_keys::agent::client::AgentClient;
use russh_keys::key::{KeyPair, PublicKey};
use tokio::net::UnixStream;

use crate::application::ports::PassphrasePrompt;
use crate::domain::ProvisionError;

/// Environment variable naming the SSH agent socket.
pub const AGENT_SOCKET_ENV: &str = "SSH_AUTH_SOCK";

type AgentConnection = AgentClient<UnixStream>;

/// Where an [`AuthHandle`] gets its signatures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    /// A private key parsed in process.
    PrivateKey,
    /// Identities held by the SSH agent.
    Agent,
}

enum Credential {
    Key(Arc<KeyPair>),
    Agent {
        client: AgentConnection,
        identities: Vec<PublicKey>,
    },
    Released,
}

/// A resolved credential, owned by the caller for the life of the SSH session.
///
/// Agent-backed handles hold the agent connection open until [`close`] is
/// called or the handle is dropped.
///
/// [`close`]: AuthHandle::close
pub struct AuthHandle {
    credential: Credential,
}

impl AuthHandle {
    fn key(pair: KeyPair) -> Self {
        Self {
            credential: Credential::Key(Arc::new(pair)),
        }
    }

    fn agent(client: AgentConnection, identities: Vec<PublicKey>) -> Self {
        Self {
            credential: Credential::Agent { client, identities },
        }
    }

    /// The signing source, or `None` once the handle has been closed.
    #[must_use]
    pub fn source(&self) -> Option<AuthSource> {
        match self.credential {
            Credential::Key(_) => Some(AuthSource::PrivateKey),
            Credential::Agent { .. } => Some(AuthSource::Agent),
            Credential::Released => None,
        }
    }

    /// Number of agent identities offered; zero for key-backed handles.
    #[must_use]
    pub fn agent_identities(&self) -> usize {
        match &self.credential {
            Credential::Agent { identities, .. } => identities.len(),
            _ => 0,
        }
    }

    /// Releases the credential, closing the agent connection if there is one.
    /// Safe to call any number of times.
    pub fn close(&mut self) {
        if let Credential::Agent { .. } = self.credential {
            tracing::debug!("closing ssh agent connection");
        }
        self.credential = Credential::Released;
    }

    /// Authenticates `user` on an established SSH session.
    ///
    /// Returns `Ok(false)` when the server rejected every offered key.
    pub(crate) async fn authenticate<H>(
        &mut self,
        session: &mut russh::client::Handle<H>,
        user: &str,
    ) -> Result<bool, String>
    where
        H: russh::client::Handler,
    {
        match std::mem::replace(&mut self.credential, Credential::Released) {
            Credential::Key(pair) => {
                let outcome = session
                    .authenticate_publickey(user, Arc::clone(&pair))
                    .await
                    .map_err(|e| e.to_string());
                self.credential = Credential::Key(pair);
                outcome
            }
            Credential::Agent {
                mut client,
                identities,
            } => {
                let mut outcome = Ok(false);
                for identity in &identities {
                    let (returned, result) = session
                        .authenticate_future(user, identity.clone(), client)
                        .await;
                    client = returned;
                    match result {
                        Ok(true) => {
                            outcome = Ok(true);
                            break;
                        }
                        Ok(false) => {
                            tracing::debug!(key = %identity.fingerprint(), "agent key rejected");
                        }
                        Err(e) => outcome = Err(e.to_string()),
                    }
                }
                self.credential = Credential::Agent { client, identities };
                outcome
            }
            Credential::Released => Err("credential has already been released".to_string()),
        }
    }
}

impl Drop for AuthHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for AuthHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthHandle")
            .field("source", &self.source())
            .field("agent_identities", &self.agent_identities())
            .finish()
    }
}

// ── Resolver ──────────────────────────────────────────────────────────────────

/// Outcome of one resolution step.
enum Step {
    Resolved(AuthHandle),
    Continue,
}

/// Resolves SSH credentials from a key file, the SSH agent, or a prompt.
pub struct CredentialResolver<P> {
    agent_socket: Option<PathBuf>,
    prompt: P,
}

impl<P: PassphrasePrompt> CredentialResolver<P> {
    /// Creates a resolver that dials `agent_socket` for agent access.
    #[must_use]
    pub fn new(agent_socket: Option<PathBuf>, prompt: P) -> Self {
        Self {
            agent_socket,
            prompt,
        }
    }

    /// Creates a resolver using the socket named by `SSH_AUTH_SOCK`.
    #[must_use]
    pub fn from_env(prompt: P) -> Self {
        let socket = std::env::var_os(AGENT_SOCKET_ENV)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        Self::new(socket, prompt)
    }

    /// Resolves credentials for `private_key_path`, or the agent when `None`.
    ///
    /// # Errors
    ///
    /// - `AgentUnreachable` when no key path is given and the agent cannot be dialed
    /// - `KeyRead` when the key file cannot be read
    /// - `KeyParse` when the key is malformed for a reason other than encryption
    /// - `PassphraseParse` when the prompted passphrase does not decrypt the key
    pub async fn resolve(
        &self,
        private_key_path: Option<&Path>,
    ) -> Result<AuthHandle, ProvisionError> {
        let Some(path) = private_key_path.filter(|p| !p.as_os_str().is_empty()) else {
            return self.agent_identities().await;
        };

        let secret = read_key(path).await?;
        if let Step::Resolved(handle) = unencrypted_key(path, &secret)? {
            tracing::debug!(key = %path.display(), "using unencrypted private key");
            return Ok(handle);
        }
        if let Step::Resolved(handle) = self.matching_agent_identity(path).await {
            tracing::debug!(key = %path.display(), "using matching ssh agent identity");
            return Ok(handle);
        }
        let handle = self.prompted_key(path, &secret)?;
        tracing::debug!(key = %path.display(), "using passphrase-decrypted private key");
        Ok(handle)
    }

    async fn dial_agent(&self) -> Result<AgentConnection, ProvisionError> {
        let socket = self
            .agent_socket
            .as_deref()
            .ok_or_else(|| ProvisionError::AgentUnreachable {
                reason: format!("{AGENT_SOCKET_ENV} is not set"),
            })?;
        AgentClient::connect_uds(socket)
            .await
            .map_err(|e| ProvisionError::AgentUnreachable {
                reason: format!("{}: {e}", socket.display()),
            })
    }

    async fn agent_identities(&self) -> Result<AuthHandle, ProvisionError> {
        let mut client = self.dial_agent().await?;
        let identities =
            client
                .request_identities()
                .await
                .map_err(|e| ProvisionError::AgentUnreachable {
                    reason: format!("listing identities failed: {e}"),
                })?;
        tracing::debug!(count = identities.len(), "using ssh agent identities");
        Ok(AuthHandle::agent(client, identities))
    }

    /// Every failure here means "fallback unavailable", never an error.
    async fn matching_agent_identity(&self, key_path: &Path) -> Step {
        let mut client = match self.dial_agent().await {
            Ok(client) => client,
            Err(e) => {
                tracing::debug!("agent fallback unavailable: {e}");
                return Step::Continue;
            }
        };
        let identities = match client.request_identities().await {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) => {
                tracing::debug!("agent fallback unavailable: agent holds no keys");
                return Step::Continue;
            }
            Err(e) => {
                tracing::debug!("agent fallback unavailable: {e}");
                return Step::Continue;
            }
        };

        let pub_path = public_key_path(key_path);
        let wanted = match tokio::fs::read_to_string(&pub_path).await {
            Ok(text) => parse_authorized_key(&text),
            Err(e) => {
                tracing::debug!(path = %pub_path.display(), "agent fallback unavailable: {e}");
                None
            }
        };
        let Some(wanted) = wanted else {
            return Step::Continue;
        };

        let blob = wanted.public_key_bytes();
        match identities
            .into_iter()
            .find(|id| id.public_key_bytes() == blob)
        {
            Some(identity) => Step::Resolved(AuthHandle::agent(client, vec![identity])),
            None => {
                tracing::debug!("agent fallback unavailable: no identity matches {}", pub_path.display());
                Step::Continue
            }
        }
    }

    fn prompted_key(&self, path: &Path, secret: &str) -> Result<AuthHandle, ProvisionError> {
        // A prompt that cannot read the terminal counts as an empty answer so
        // unattended runs fail on the key, not on the tty.
        let passphrase = self.prompt.passphrase(path).unwrap_or_else(|e| {
            tracing::debug!("reading passphrase failed: {e:#}");
            String::new()
        });
        russh_keys::decode_secret_key(secret, Some(&passphrase))
            .map(AuthHandle::key)
            .map_err(|e| ProvisionError::PassphraseParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

async fn read_key(path: &Path) -> Result<String, ProvisionError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ProvisionError::KeyRead {
            path: path.to_path_buf(),
            source,
        })?;
    String::from_utf8(bytes).map_err(|_| ProvisionError::KeyParse {
        path: path.to_path_buf(),
        reason: "key file is not valid UTF-8".to_string(),
    })
}

fn unencrypted_key(path: &Path, secret: &str) -> Result<Step, ProvisionError> {
    match russh_keys::decode_secret_key(secret, None) {
        Ok(pair) => Ok(Step::Resolved(AuthHandle::key(pair))),
        Err(russh_keys::Error::KeyIsEncrypted) => Ok(Step::Continue),
        Err(e) => Err(ProvisionError::KeyParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// `<key>.pub` next to the private key.
fn public_key_path(key_path: &Path) -> PathBuf {
    let mut name = OsString::from(key_path.as_os_str());
    name.push(".pub");
    PathBuf::from(name)
}

/// Parses the first key line of an OpenSSH public key file
/// (`<type> <base64> [comment]`).
fn parse_authorized_key(text: &str) -> Option<PublicKey> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))?;
    let encoded = line.split_whitespace().nth(1)?;
    match russh_keys::parse_public_key_base64(encoded) {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::debug!("agent fallback unavailable: unparseable public key: {e}");
            None
        }
    }
}

// ── Terminal prompt ───────────────────────────────────────────────────────────

/// Production `PassphrasePrompt`: reads from the terminal without echo.
pub struct TerminalPrompt;

impl PassphrasePrompt for TerminalPrompt {
    fn passphrase(&self, key_path: &Path) -> Result<String> {
        let value = dialoguer::Password::new()
            .with_prompt(format!("Enter passphrase for '{}'", key_path.display()))
            .allow_empty_password(true)
            .interact()?;
        Ok(value)
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
