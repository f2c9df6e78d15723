//! Collects per-host outcomes under a single batch deadline.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::ExecError;
use crate::ssh::ExecutionOutcome;

/// Batch-level judgment plus the text to show for each observed host.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunVerdict {
    pub success: bool,
    pub reports: Vec<String>,
    /// Outcomes actually observed before the run ended.
    pub observed: usize,
    pub timed_out: bool,
    /// Hosts with no outcome when the deadline fired.
    pub outstanding: Vec<String>,
}

impl RunVerdict {
    fn new() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    fn observe(&mut self, outcome: &ExecutionOutcome) {
        self.observed += 1;
        if !outcome.is_success() {
            self.success = false;
        }
        self.reports.push(outcome.report());
    }
}

/// Wait for up to `machines.len()` outcomes or until `deadline` elapses.
///
/// On timeout a single report names the hosts still outstanding and the
/// receiver is dropped; late outcomes are discarded.
pub async fn aggregate(
    machines: &[String],
    mut outcomes: mpsc::Receiver<ExecutionOutcome>,
    deadline: Duration,
) -> RunVerdict {
    let mut verdict = RunVerdict::new();
    let mut outstanding: Vec<&str> = machines.iter().map(String::as_str).collect();

    let timer = tokio::time::sleep(deadline);
    tokio::pin!(timer);

    while verdict.observed < machines.len() {
        tokio::select! {
            biased;

            next = outcomes.recv() => {
                let Some(outcome) = next else {
                    let missing = machines.len() - verdict.observed;
                    log::error!("{} host(s) exited without reporting", missing);
                    verdict.success = false;
                    verdict.reports.push(format!("{} host(s) exited without reporting", missing));
                    break;
                };

                if let Some(pos) = outstanding.iter().position(|h| *h == outcome.host) {
                    outstanding.remove(pos);
                }
                verdict.observe(&outcome);
            }

            _ = &mut timer => {
                let err = ExecError::GlobalTimeout {
                    waited: deadline,
                    outstanding: outstanding.iter().map(|h| h.to_string()).collect(),
                };
                log::error!("{}", err);

                verdict.success = false;
                verdict.timed_out = true;
                verdict.outstanding = outstanding.iter().map(|h| h.to_string()).collect();
                verdict.reports.push(capitalize(&err.to_string()));
                break;
            }
        }
    }

    log::info!(
        "Observed {}/{} host(s), success: {}",
        verdict.observed,
        machines.len(),
        verdict.success
    );
    verdict
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn machines(hosts: &[&str]) -> Vec<String> {
        hosts.iter().map(|h| h.to_string()).collect()
    }

    fn ok(host: &str) -> ExecutionOutcome {
        ExecutionOutcome::success(host, "file1\n")
    }

    fn unreachable(host: &str) -> ExecutionOutcome {
        ExecutionOutcome::failed(host, ExecError::ConnectionFailed("refused".to_string()))
    }

    /// Send each outcome after its delay, from its own task.
    fn feed(items: Vec<(ExecutionOutcome, u64)>) -> mpsc::Receiver<ExecutionOutcome> {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for (outcome, delay) in items {
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let _ = tx.send(outcome).await;
            });
        }
        rx
    }

    #[tokio::test]
    async fn test_all_hosts_succeed() {
        let hosts = machines(&["h1", "h2"]);
        let rx = feed(vec![(ok("h1"), 10), (ok("h2"), 400)]);

        let verdict = aggregate(&hosts, rx, Duration::from_secs(5)).await;
        assert!(verdict.success);
        assert!(!verdict.timed_out);
        assert_eq!(verdict.observed, 2);
        assert_eq!(verdict.reports, vec!["h1:\nfile1\n", "h2:\nfile1\n"]);
    }

    #[tokio::test]
    async fn test_one_unreachable_host_fails_batch() {
        let hosts = machines(&["h1", "h2"]);
        let rx = feed(vec![(ok("h1"), 10), (unreachable("h2"), 5)]);

        let verdict = aggregate(&hosts, rx, Duration::from_secs(5)).await;
        assert!(!verdict.success);
        assert_eq!(verdict.reports.len(), 2);
        let successes: Vec<_> = verdict.reports.iter().filter(|r| r.starts_with("h1:\n")).collect();
        assert_eq!(successes.len(), 1);
        assert!(verdict.reports.contains(&"h2: connection failed: refused".to_string()));
    }

    #[tokio::test]
    async fn test_same_bad_host_fails_every_time() {
        for _ in 0..3 {
            let hosts = machines(&["h1", "bad"]);
            let rx = feed(vec![(ok("h1"), 1), (unreachable("bad"), 1)]);
            assert!(!aggregate(&hosts, rx, Duration::from_secs(5)).await.success);
        }
    }

    #[tokio::test]
    async fn test_deadline_returns_early_and_names_outstanding() {
        let hosts = machines(&["h1", "h2", "h3"]);
        let rx = feed(vec![(ok("h1"), 10), (ok("h2"), 5_000), (ok("h3"), 5_000)]);

        let started = Instant::now();
        let verdict = aggregate(&hosts, rx, Duration::from_millis(200)).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!verdict.success);
        assert!(verdict.timed_out);
        assert_eq!(verdict.observed, 1);
        assert_eq!(verdict.outstanding, vec!["h2", "h3"]);
        assert_eq!(verdict.reports.len(), 2);
        assert_eq!(verdict.reports[0], "h1:\nfile1\n");
        assert_eq!(
            verdict.reports[1],
            "Timed out after 0.2s waiting for 2 host(s): h2, h3"
        );
    }

    #[tokio::test]
    async fn test_single_slow_host_times_out() {
        let hosts = machines(&["h1"]);
        let rx = feed(vec![(ok("h1"), 3_000)]);

        let started = Instant::now();
        let verdict = aggregate(&hosts, rx, Duration::from_millis(100)).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!verdict.success);
        assert!(verdict.timed_out);
        assert_eq!(verdict.observed, 0);
        assert_eq!(verdict.reports.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_hosts_are_counted() {
        let hosts = machines(&["h1", "h1"]);
        let rx = feed(vec![(ok("h1"), 5), (ok("h1"), 5_000)]);

        let verdict = aggregate(&hosts, rx, Duration::from_millis(150)).await;
        assert!(verdict.timed_out);
        assert_eq!(verdict.outstanding, vec!["h1"]);
    }

    #[tokio::test]
    async fn test_lost_outcome_fails_without_waiting_for_deadline() {
        let hosts = machines(&["h1", "h2"]);
        let (tx, rx) = mpsc::channel(2);
        tx.send(ok("h1")).await.unwrap();
        drop(tx);

        let started = Instant::now();
        let verdict = aggregate(&hosts, rx, Duration::from_secs(10)).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!verdict.success);
        assert!(!verdict.timed_out);
        assert_eq!(verdict.reports.last().unwrap(), "1 host(s) exited without reporting");
    }

    #[tokio::test]
    async fn test_empty_machines_is_trivially_successful() {
        let (_tx, rx) = mpsc::channel(1);
        let verdict = aggregate(&[], rx, Duration::from_millis(10)).await;
        assert!(verdict.success);
        assert!(verdict.reports.is_empty());
    }

    #[test]
    fn test_verdict_json() {
        let verdict = RunVerdict {
            success: false,
            reports: vec!["h1:\nok\n".to_string()],
            observed: 1,
            timed_out: true,
            outstanding: vec!["h2".to_string()],
        };
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("\"outstanding\":[\"h2\"]"));
    }
}
