use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Failure kinds a single host (or the whole batch) can end in.
///
/// None of these abort a run; they only make the verdict unsuccessful.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExecError {
    /// Could not establish transport (or the SSH handshake) to host:port.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Every offered identity was rejected, or none was available.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The session could not be opened, the command exited non-zero,
    /// or the channel closed abnormally.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// The batch deadline elapsed before every host reported.
    #[error("timed out after {}s waiting for {} host(s): {}", .waited.as_secs_f64(), .outstanding.len(), .outstanding.join(", "))]
    GlobalTimeout {
        waited: Duration,
        outstanding: Vec<String>,
    },
}

/// Errors raised while turning flags, environment and config file into a `RunRequest`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no machines given; pass at least one with -m/--machines")]
    NoMachines,

    #[error("no command given; pass one with -c/--command")]
    NoCommand,

    #[error("no remote user given; pass one with -u/--user")]
    NoUser,

    #[error("invalid port {0:?}: expected an integer between 1 and 65535")]
    InvalidPort(String),

    #[error("invalid timeout {0:?}: expected a positive number of seconds")]
    InvalidTimeout(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("--max-parallel must be at least 1")]
    InvalidParallelism,

    #[error("agent authentication requested but no agent socket is known (set --agent-socket or SSH_AUTH_SOCK)")]
    AgentSocketMissing,

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
