use super::credentials::{self, CredentialSet, Identity};
use super::{ExecutionOutcome, Executor};
use crate::error::ExecError;
use crate::request::RunRequest;
use async_trait::async_trait;
use russh::keys::agent::client::AgentClient;
use russh::keys::*;
use russh::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixStream;

/// Runs a command on one host over russh: connect, authenticate, exec, capture.
pub struct SshExecutor {
    config: Arc<client::Config>,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new(client::Config::default())
    }
}

impl SshExecutor {
    pub fn new(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn connect(
        &self,
        host: &str,
        request: &RunRequest,
    ) -> Result<client::Handle<RunnerHandler>, ExecError> {
        let handler = RunnerHandler {
            host: host.to_string(),
            port: request.port(),
            known_hosts: request.known_hosts().map(|p| p.to_path_buf()),
        };

        client::connect(self.config.clone(), (host, request.port()), handler)
            .await
            .map_err(|e| ExecError::ConnectionFailed(format!("{}:{}: {}", host, request.port(), e)))
    }
}

#[async_trait]
impl Executor for SshExecutor {
    async fn execute(
        &self,
        host: &str,
        request: &RunRequest,
        credentials: &CredentialSet,
    ) -> ExecutionOutcome {
        log::debug!("Connecting to {}:{} as {}", host, request.port(), request.user());

        let mut handle = match self.connect(host, request).await {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("{}: {}", host, e);
                return ExecutionOutcome::failed(host, e);
            }
        };

        let outcome = match authenticate(&mut handle, request.user(), credentials).await {
            Ok(()) => {
                log::info!("SSH connected to {}:{}", host, request.port());
                run_command(&handle, host, request.command()).await
            }
            Err(e) => {
                log::error!("{}: {}", host, e);
                ExecutionOutcome::failed(host, e)
            }
        };

        // Every path past a successful connect ends here.
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            log::debug!("{}: disconnect failed: {}", host, e);
        }

        outcome
    }
}

/// Client handler carrying the host-key policy for one connection.
struct RunnerHandler {
    host: String,
    port: u16,
    known_hosts: Option<PathBuf>,
}

impl client::Handler for RunnerHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let Some(path) = &self.known_hosts else {
            log::warn!(
                "Accepting host key for {}:{} without verification",
                self.host,
                self.port
            );
            return Ok(true);
        };

        match check_known_hosts_path(&self.host, self.port, server_public_key, path) {
            Ok(true) => Ok(true),
            Ok(false) => {
                log::error!(
                    "Host key for {}:{} not found in {}",
                    self.host,
                    self.port,
                    path.display()
                );
                Ok(false)
            }
            Err(e) => {
                log::error!("Host key check for {}:{} failed: {}", self.host, self.port, e);
                Err(e.into())
            }
        }
    }
}

/// Offer each identity in turn until the server accepts one.
async fn authenticate(
    handle: &mut client::Handle<RunnerHandler>,
    user: &str,
    credentials: &CredentialSet,
) -> Result<(), ExecError> {
    if credentials.is_empty() {
        return Err(auth_failure(credentials, user));
    }

    let rsa_hash = handle.best_supported_rsa_hash().await.ok().flatten().flatten();
    let mut agent = LazyAgent::new(credentials.agent_socket());

    for identity in credentials.iter() {
        let result = match identity {
            Identity::File { key, .. } => handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key.clone(), rsa_hash))
                .await
                .map_err(|e| e.to_string()),
            Identity::Agent(public_key) => {
                let Some(agent) = agent.get().await else {
                    continue;
                };
                handle
                    .authenticate_publickey_with(user, public_key.clone(), rsa_hash, agent)
                    .await
                    .map_err(|e| e.to_string())
            }
        };

        match result {
            Ok(client::AuthResult::Success) => return Ok(()),
            Ok(client::AuthResult::Failure { .. }) => {
                log::debug!("Identity {} rejected for {}", identity.public_key().algorithm(), user);
            }
            Err(e) => {
                log::debug!("Identity {} errored for {}: {}", identity.public_key().algorithm(), user, e);
            }
        }
    }

    Err(auth_failure(credentials, user))
}

/// Agent connection opened on first use; a failed attempt is not retried.
struct LazyAgent<'a> {
    socket: Option<&'a Path>,
    tried: bool,
    client: Option<AgentClient<UnixStream>>,
}

impl<'a> LazyAgent<'a> {
    fn new(socket: Option<&'a Path>) -> Self {
        Self {
            socket,
            tried: false,
            client: None,
        }
    }

    async fn get(&mut self) -> Option<&mut AgentClient<UnixStream>> {
        if !self.tried {
            self.tried = true;
            if let Some(socket) = self.socket {
                self.client = credentials::connect_agent(socket)
                    .await
                    .map_err(|e| log::warn!("Agent unavailable for signing: {}", e))
                    .ok();
            }
        }
        self.client.as_mut()
    }
}

fn auth_failure(credentials: &CredentialSet, user: &str) -> ExecError {
    if credentials.is_empty() {
        ExecError::AuthenticationFailed("no identities available".to_string())
    } else {
        ExecError::AuthenticationFailed(format!(
            "{} identities rejected for user {}",
            credentials.len(),
            user
        ))
    }
}

/// Open a session channel, run `command`, and collect stdout until the channel closes.
async fn run_command(
    handle: &client::Handle<RunnerHandler>,
    host: &str,
    command: &str,
) -> ExecutionOutcome {
    let mut channel = match handle.channel_open_session().await {
        Ok(channel) => channel,
        Err(e) => {
            log::error!("{}: could not open session: {}", host, e);
            return ExecutionOutcome::failed(
                host,
                ExecError::CommandFailed(format!("could not open session: {}", e)),
            );
        }
    };

    if let Err(e) = channel.exec(true, command).await {
        log::error!("{}: exec request failed: {}", host, e);
        return ExecutionOutcome::failed(
            host,
            ExecError::CommandFailed(format!("exec request failed: {}", e)),
        );
    }

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;
    let mut exit_signal = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
            // SSH_EXTENDED_DATA_STDERR
            ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
            ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
            ChannelMsg::ExitSignal { signal_name, .. } => exit_signal = Some(signal_name),
            _ => {}
        }
    }

    let stdout = String::from_utf8_lossy(&stdout);
    if !stderr.is_empty() {
        log::debug!("{} stderr:\n{}", host, String::from_utf8_lossy(&stderr));
    }

    finish(host, &stdout, exit_status, exit_signal)
}

/// Map how the remote command ended to the host's outcome.
fn finish(host: &str, stdout: &str, exit_status: Option<u32>, exit_signal: Option<Sig>) -> ExecutionOutcome {
    match (exit_status, exit_signal) {
        (Some(0), _) => {
            log::info!("{}: command finished ({} bytes)", host, stdout.len());
            ExecutionOutcome::success(host, stdout)
        }
        (Some(code), _) => {
            log::error!("{}: command exited with status {}", host, code);
            ExecutionOutcome::command_failed(host, stdout, format!("exited with status {}", code))
        }
        (None, Some(signal)) => {
            log::error!("{}: command killed by signal {:?}", host, signal);
            ExecutionOutcome::command_failed(host, stdout, format!("killed by signal {:?}", signal))
        }
        (None, None) => {
            log::error!("{}: channel closed without an exit status", host);
            ExecutionOutcome::command_failed(host, stdout, "channel closed without an exit status")
        }
    }
}
