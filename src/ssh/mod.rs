pub mod credentials;
pub mod session;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ExecError;
use crate::request::RunRequest;

pub use credentials::{resolve, CredentialSet, Identity};
pub use session::SshExecutor;

/// Result of one execution attempt against one host.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub host: String,
    /// `"<host>:\n<stdout>"` once the command ran, empty if it never started.
    pub output: String,
    pub err: Option<ExecError>,
}

impl ExecutionOutcome {
    pub fn success(host: &str, stdout: &str) -> Self {
        Self {
            host: host.to_string(),
            output: labelled(host, stdout),
            err: None,
        }
    }

    /// A failure before the command produced anything (connect, auth).
    pub fn failed(host: &str, err: ExecError) -> Self {
        Self {
            host: host.to_string(),
            output: String::new(),
            err: Some(err),
        }
    }

    /// A command that ran but did not succeed; its stdout is kept.
    pub fn command_failed(host: &str, stdout: &str, reason: impl Into<String>) -> Self {
        Self {
            host: host.to_string(),
            output: labelled(host, stdout),
            err: Some(ExecError::CommandFailed(reason.into())),
        }
    }

    pub fn is_success(&self) -> bool {
        self.err.is_none()
    }

    /// Text shown to the operator for this host.
    pub fn report(&self) -> String {
        let Some(err) = &self.err else {
            return self.output.clone();
        };

        let mut report = format!("{}: {}", self.host, err);
        let captured = self
            .output
            .strip_prefix(&labelled(&self.host, ""))
            .unwrap_or(&self.output);
        if !captured.is_empty() {
            report.push('\n');
            report.push_str(captured);
        }
        report
    }
}

fn labelled(host: &str, stdout: &str) -> String {
    format!("{}:\n{}", host, stdout)
}

/// The remote session provider: dial, authenticate, run, capture.
///
/// Implementations own no timeout; the batch deadline is enforced by the
/// aggregator.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(
        &self,
        host: &str,
        request: &RunRequest,
        credentials: &CredentialSet,
    ) -> ExecutionOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_output_is_labelled() {
        let outcome = ExecutionOutcome::success("h1", "a\nb\n");
        assert_eq!(outcome.output, "h1:\na\nb\n");
        assert!(outcome.is_success());
        assert_eq!(outcome.report(), "h1:\na\nb\n");
    }

    #[test]
    fn test_connection_failure_report() {
        let outcome =
            ExecutionOutcome::failed("h2", ExecError::ConnectionFailed("refused".to_string()));
        assert!(outcome.output.is_empty());
        assert_eq!(outcome.report(), "h2: connection failed: refused");
    }

    #[test]
    fn test_command_failure_keeps_stdout() {
        let outcome = ExecutionOutcome::command_failed("h3", "partial\n", "exited with status 2");
        assert_eq!(outcome.output, "h3:\npartial\n");
        assert_eq!(
            outcome.report(),
            "h3: command failed: exited with status 2\npartial\n"
        );
    }

    #[test]
    fn test_command_failure_without_stdout() {
        let outcome = ExecutionOutcome::command_failed("h3", "", "exited with status 1");
        assert_eq!(outcome.report(), "h3: command failed: exited with status 1");
    }
}
