use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Default batch deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed for one fan-out run.
///
/// Built in full by the configuration layer and never mutated once handed to
/// the dispatcher; executors see it through a shared `Arc`.
#[derive(Clone, Debug, PartialEq)]
pub struct RunRequest {
    machines: Vec<String>,
    port: u16,
    user: String,
    command: String,
    key_path: Option<PathBuf>,
    use_agent: bool,
    agent_socket: Option<PathBuf>,
    timeout: Duration,
    max_parallel: Option<usize>,
    known_hosts: Option<PathBuf>,
}

impl RunRequest {
    pub fn new(
        machines: Vec<String>,
        user: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            machines,
            port: DEFAULT_PORT,
            user: user.into(),
            command: command.into(),
            key_path: None,
            use_agent: false,
            agent_socket: None,
            timeout: DEFAULT_TIMEOUT,
            max_parallel: None,
            known_hosts: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Authenticate with identities held by the agent listening on `socket`.
    pub fn with_agent(mut self, socket: impl Into<PathBuf>) -> Self {
        self.use_agent = true;
        self.agent_socket = Some(socket.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cap the number of hosts contacted at the same time.
    pub fn with_max_parallel(mut self, limit: usize) -> Self {
        self.max_parallel = Some(limit);
        self
    }

    /// Verify host keys against an OpenSSH known_hosts file instead of
    /// accepting whatever key the remote presents.
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    pub fn machines(&self) -> &[String] {
        &self.machines
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn key_path(&self) -> Option<&Path> {
        self.key_path.as_deref()
    }

    pub fn use_agent(&self) -> bool {
        self.use_agent
    }

    pub fn agent_socket(&self) -> Option<&Path> {
        self.agent_socket.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_parallel(&self) -> Option<usize> {
        self.max_parallel
    }

    pub fn known_hosts(&self) -> Option<&Path> {
        self.known_hosts.as_deref()
    }
}
