//! Credential resolution.
//!
//! Collects the signing identities offered to every host: agent-held keys
//! first, then the private key file. Both sources degrade silently to zero
//! identities; an empty set only surfaces later as a per-host
//! authentication failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::agent::client::AgentClient;
use russh::keys::{decode_secret_key, PrivateKey, PublicKey};
use tokio::net::UnixStream;

/// One identity usable for public-key authentication.
#[derive(Clone, Debug)]
pub enum Identity {
    /// A key held by the SSH agent; signing goes through the agent socket.
    Agent(PublicKey),
    /// A private key read from disk.
    File { path: PathBuf, key: Arc<PrivateKey> },
}

impl Identity {
    pub fn public_key(&self) -> &PublicKey {
        match self {
            Identity::Agent(key) => key,
            Identity::File { key, .. } => key.public_key(),
        }
    }
}

/// Ordered identities shared read-only by every executor.
#[derive(Clone, Debug, Default)]
pub struct CredentialSet {
    identities: Vec<Identity>,
    agent_socket: Option<PathBuf>,
}

impl CredentialSet {
    pub fn new(identities: Vec<Identity>, agent_socket: Option<PathBuf>) -> Self {
        Self {
            identities,
            agent_socket,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }

    /// Socket the agent identities came from, needed again for signing.
    pub fn agent_socket(&self) -> Option<&Path> {
        self.agent_socket.as_deref()
    }
}

/// Build the credential set for a run.
pub async fn resolve(
    key_path: Option<&Path>,
    use_agent: bool,
    agent_socket: Option<&Path>,
) -> CredentialSet {
    let mut identities = Vec::new();
    let mut socket_used = None;

    if use_agent {
        match agent_socket {
            Some(socket) => match agent_identities(socket).await {
                Ok(keys) => {
                    log::debug!("Agent at {} offered {} identities", socket.display(), keys.len());
                    identities.extend(keys.into_iter().map(Identity::Agent));
                    socket_used = Some(socket.to_path_buf());
                }
                Err(e) => {
                    log::warn!("Skipping agent at {}: {}", socket.display(), e);
                }
            },
            None => log::warn!("Agent requested but no socket configured"),
        }
    }

    if let Some(path) = key_path.filter(|p| !p.as_os_str().is_empty()) {
        match load_key(path).await {
            Ok(key) => identities.push(Identity::File {
                path: path.to_path_buf(),
                key: Arc::new(key),
            }),
            Err(e) => {
                log::warn!("Skipping key {}: {}", path.display(), e);
            }
        }
    }

    CredentialSet::new(identities, socket_used)
}

/// Open a fresh connection to the agent. Dropping the client closes it.
pub(crate) async fn connect_agent(
    socket: &Path,
) -> Result<AgentClient<UnixStream>, russh::keys::Error> {
    AgentClient::connect_uds(socket).await
}

async fn agent_identities(socket: &Path) -> Result<Vec<PublicKey>, russh::keys::Error> {
    let mut agent = connect_agent(socket).await?;
    agent.request_identities().await
}

async fn load_key(path: &Path) -> Result<PrivateKey, anyhow::Error> {
    let pem = tokio::fs::read_to_string(path).await?;
    let key = decode_secret_key(&pem, None)?;
    Ok(key)
}
