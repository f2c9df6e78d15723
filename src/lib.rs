//! sshrunner — run one shell command on many hosts over SSH.
//!
//! Credentials are resolved once, one task per host connects and runs the
//! command concurrently, and the outcomes are aggregated under a single
//! batch deadline into a pass/fail verdict with per-host reports.

pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod request;
pub mod ssh;

use std::sync::Arc;

pub use aggregate::{aggregate, RunVerdict};
pub use dispatch::dispatch;
pub use error::{ConfigError, ExecError};
pub use request::RunRequest;
pub use ssh::{CredentialSet, ExecutionOutcome, Executor, Identity, SshExecutor};

/// Run `request` against real hosts over SSH.
pub async fn run(request: RunRequest) -> RunVerdict {
    let credentials = ssh::resolve(
        request.key_path(),
        request.use_agent(),
        request.agent_socket(),
    )
    .await;
    log::debug!("Resolved {} identities", credentials.len());

    run_with(request, credentials, SshExecutor::default()).await
}

/// Run `request` with an already-resolved credential set and any executor.
pub async fn run_with<E: Executor>(
    request: RunRequest,
    credentials: CredentialSet,
    executor: E,
) -> RunVerdict {
    let request = Arc::new(request);
    let deadline = request.timeout();

    let outcomes = dispatch(request.clone(), Arc::new(credentials), Arc::new(executor));
    aggregate(request.machines(), outcomes, deadline).await
}
