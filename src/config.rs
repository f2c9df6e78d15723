//! Configuration layer.
//!
//! Turns command-line flags, `SSHRUNNER_*` environment variables and an
//! optional YAML file into a validated [`RunRequest`].
//!
//! Precedence: flag > environment > config file > default. This is the only
//! module that looks at the process environment or the home directory; it
//! does so once, through [`Environment::from_process`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::request::{RunRequest, DEFAULT_PORT, DEFAULT_TIMEOUT};

/// Config file looked up in the home directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = ".sshrunner.yaml";

/// Sshrunner runs ssh commands across multiple servers
#[derive(Parser, Debug)]
#[command(name = "sshrunner")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default is $HOME/.sshrunner.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Hosts to run the command on (repeatable or comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub machines: Vec<String>,

    /// SSH port to connect to
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Command to run
    #[arg(short, long)]
    pub command: Option<String>,

    /// User to run the command as
    #[arg(short, long)]
    pub user: Option<String>,

    /// SSH private key to use for authentication, full path
    #[arg(short, long)]
    pub key: Option<PathBuf>,

    /// Use the SSH agent for authentication
    #[arg(short = 'a', long = "useagent")]
    pub use_agent: bool,

    /// Agent socket (default is $SSH_AUTH_SOCK)
    #[arg(long)]
    pub agent_socket: Option<PathBuf>,

    /// Seconds to wait for all hosts before giving up
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Maximum number of hosts contacted at the same time
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Verify host keys against this known_hosts file
    #[arg(long)]
    pub known_hosts: Option<PathBuf>,

    /// Print the verdict as JSON
    #[arg(long)]
    pub json: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Snapshot of the environment variables and home directory the
/// configuration layer consults.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
    home: Option<PathBuf>,
}

impl Environment {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
            home: dirs::home_dir(),
        }
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Non-empty value of `key`.
    fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }
}

/// Top-level shape of the YAML file; settings live under `sshrunner:`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub sshrunner: FileSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileSection {
    pub machines: Vec<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub command: Option<String>,
    pub key: Option<PathBuf>,
    pub useagent: Option<bool>,
    pub agent_socket: Option<PathBuf>,
    pub timeout: Option<u64>,
    pub max_parallel: Option<usize>,
    pub known_hosts: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load the explicit file, or `$HOME/.sshrunner.yaml` if it exists.
    ///
    /// A missing explicit file is an error; a missing default file is not.
    pub fn discover(
        explicit: Option<&Path>,
        env: &Environment,
    ) -> Result<Option<(PathBuf, Self)>, ConfigError> {
        if let Some(path) = explicit {
            return Ok(Some((path.to_path_buf(), Self::load(path)?)));
        }

        let Some(home) = env.home() else {
            return Ok(None);
        };
        let path = home.join(DEFAULT_CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let config = Self::load(&path)?;
        Ok(Some((path, config)))
    }
}

/// Discover the config file and build the request from all three layers.
pub fn load(cli: &Cli, env: &Environment) -> Result<RunRequest, ConfigError> {
    let file = match FileConfig::discover(cli.config.as_deref(), env)? {
        Some((path, config)) => {
            log::info!("Using config file: {}", path.display());
            config.sshrunner
        }
        None => FileSection::default(),
    };
    build_request(cli, &file, env)
}

/// Merge flags, environment and file settings, then validate.
pub fn build_request(
    cli: &Cli,
    file: &FileSection,
    env: &Environment,
) -> Result<RunRequest, ConfigError> {
    let machines = if !cli.machines.is_empty() {
        cli.machines.clone()
    } else if let Some(list) = env.get("SSHRUNNER_MACHINES") {
        list.split(',').map(str::to_string).collect()
    } else {
        file.machines.clone()
    };
    let machines: Vec<String> = machines
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();
    if machines.is_empty() {
        return Err(ConfigError::NoMachines);
    }

    let command = cli
        .command
        .clone()
        .or_else(|| env.get("SSHRUNNER_COMMAND").map(str::to_string))
        .or_else(|| file.command.clone())
        .filter(|c| !c.trim().is_empty())
        .ok_or(ConfigError::NoCommand)?;

    let user = cli
        .user
        .clone()
        .or_else(|| env.get("SSHRUNNER_USER").map(str::to_string))
        .or_else(|| file.user.clone())
        .or_else(|| env.get("LOGNAME").map(str::to_string))
        .or_else(|| env.get("USER").map(str::to_string))
        .filter(|u| !u.trim().is_empty())
        .ok_or(ConfigError::NoUser)?;

    let port = match (cli.port, env.get("SSHRUNNER_PORT")) {
        (Some(port), _) => port,
        (None, Some(raw)) => raw
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(raw.to_string()))?,
        (None, None) => file.port.unwrap_or(DEFAULT_PORT),
    };
    if port == 0 {
        return Err(ConfigError::InvalidPort(port.to_string()));
    }

    let timeout_secs = match (cli.timeout, env.get("SSHRUNNER_TIMEOUT")) {
        (Some(secs), _) => secs,
        (None, Some(raw)) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidTimeout(raw.to_string()))?,
        (None, None) => file.timeout.unwrap_or(DEFAULT_TIMEOUT.as_secs()),
    };
    if timeout_secs == 0 {
        return Err(ConfigError::InvalidTimeout(timeout_secs.to_string()));
    }

    let use_agent = if cli.use_agent {
        true
    } else if let Some(raw) = env.get("SSHRUNNER_USEAGENT") {
        parse_bool(raw).ok_or_else(|| ConfigError::InvalidValue {
            key: "SSHRUNNER_USEAGENT",
            value: raw.to_string(),
        })?
    } else {
        file.useagent.unwrap_or(false)
    };

    let key = cli
        .key
        .clone()
        .or_else(|| env.get("SSHRUNNER_KEY").map(PathBuf::from))
        .or_else(|| file.key.clone())
        .or_else(|| env.home().map(|h| h.join(".ssh").join("id_rsa")));

    let max_parallel = cli.max_parallel.or(file.max_parallel);
    if max_parallel == Some(0) {
        return Err(ConfigError::InvalidParallelism);
    }

    let mut request = RunRequest::new(machines, user, command)
        .with_port(port)
        .with_timeout(Duration::from_secs(timeout_secs));

    if let Some(key) = key {
        request = request.with_key(expand_home(&key, env));
    }

    if use_agent {
        let socket = cli
            .agent_socket
            .clone()
            .or_else(|| file.agent_socket.clone())
            .or_else(|| env.get("SSH_AUTH_SOCK").map(PathBuf::from))
            .ok_or(ConfigError::AgentSocketMissing)?;
        request = request.with_agent(expand_home(&socket, env));
    }

    if let Some(limit) = max_parallel {
        request = request.with_max_parallel(limit);
    }

    if let Some(path) = cli.known_hosts.clone().or_else(|| file.known_hosts.clone()) {
        request = request.with_known_hosts(expand_home(&path, env));
    }

    Ok(request)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~/` against the home directory.
fn expand_home(path: &Path, env: &Environment) -> PathBuf {
    match (path.strip_prefix("~"), env.home()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
