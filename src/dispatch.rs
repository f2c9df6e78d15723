//! Fan-out: one task per host, all reporting into one channel.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::request::RunRequest;
use crate::ssh::{CredentialSet, ExecutionOutcome, Executor};

/// Spawn one executor task per machine and return the receiving end of the
/// outcome channel.
///
/// The channel holds one slot per host, so no task ever blocks on send even
/// after the receiver has stopped reading. Outcomes arrive in completion
/// order. Must be called from within a tokio runtime.
pub fn dispatch<E: Executor>(
    request: Arc<RunRequest>,
    credentials: Arc<CredentialSet>,
    executor: Arc<E>,
) -> mpsc::Receiver<ExecutionOutcome> {
    let (tx, rx) = mpsc::channel(request.machines().len().max(1));
    let limit = request.max_parallel().map(|n| Arc::new(Semaphore::new(n.max(1))));

    log::debug!(
        "Dispatching {:?} to {} host(s)",
        request.command(),
        request.machines().len()
    );

    for host in request.machines().iter().cloned() {
        let tx = tx.clone();
        let request = request.clone();
        let credentials = credentials.clone();
        let executor = executor.clone();
        let limit = limit.clone();

        tokio::spawn(async move {
            let _permit = match limit {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            let outcome = executor.execute(&host, &request, &credentials).await;
            if tx.send(outcome).await.is_err() {
                log::debug!("{}: finished after results were collected, dropping outcome", host);
            }
        });
    }

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers each host after a per-host delay; tracks peak concurrency.
    struct Scripted {
        delays: HashMap<String, Duration>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Scripted {
        fn new(delays: &[(&str, u64)]) -> Self {
            Self {
                delays: delays
                    .iter()
                    .map(|(h, ms)| (h.to_string(), Duration::from_millis(*ms)))
                    .collect(),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Executor for Scripted {
        async fn execute(
            &self,
            host: &str,
            request: &RunRequest,
            _credentials: &CredentialSet,
        ) -> ExecutionOutcome {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delays.get(host).copied().unwrap_or_default()).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if host.starts_with("bad") {
                ExecutionOutcome::failed(host, ExecError::ConnectionFailed("refused".to_string()))
            } else {
                ExecutionOutcome::success(host, request.command())
            }
        }
    }

    fn request(machines: &[&str]) -> RunRequest {
        RunRequest::new(machines.iter().map(|m| m.to_string()).collect(), "tester", "ls")
    }

    #[tokio::test]
    async fn test_one_outcome_per_host_in_arrival_order() {
        let executor = Arc::new(Scripted::new(&[("slow", 150), ("fast", 10), ("bad1", 60)]));
        let mut rx = dispatch(
            Arc::new(request(&["slow", "fast", "bad1"])),
            Arc::new(CredentialSet::default()),
            executor,
        );

        let mut hosts = Vec::new();
        while let Some(outcome) = rx.recv().await {
            assert!(outcome.output.is_empty() || outcome.output.starts_with(&format!("{}:\n", outcome.host)));
            hosts.push(outcome.host);
        }
        assert_eq!(hosts, vec!["fast", "bad1", "slow"]);
    }

    #[tokio::test]
    async fn test_unbounded_runs_all_hosts_at_once() {
        let executor = Arc::new(Scripted::new(&[("a", 50), ("b", 50), ("c", 50), ("d", 50)]));
        let mut rx = dispatch(
            Arc::new(request(&["a", "b", "c", "d"])),
            Arc::new(CredentialSet::default()),
            executor.clone(),
        );
        while rx.recv().await.is_some() {}
        assert_eq!(executor.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_max_parallel_bounds_concurrency() {
        let executor = Arc::new(Scripted::new(&[("a", 30), ("b", 30), ("c", 30), ("d", 30)]));
        let mut rx = dispatch(
            Arc::new(request(&["a", "b", "c", "d"]).with_max_parallel(2)),
            Arc::new(CredentialSet::default()),
            executor.clone(),
        );

        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_block_senders() {
        let executor = Arc::new(Scripted::new(&[("a", 20), ("b", 20)]));
        let rx = dispatch(
            Arc::new(request(&["a", "b"])),
            Arc::new(CredentialSet::default()),
            executor.clone(),
        );
        drop(rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(executor.running.load(Ordering::SeqCst), 0);
    }
}
