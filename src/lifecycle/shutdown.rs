//! Shutdown coordination.
//!
//! Every client is released concurrently; the whole fan-in races a single
//! deadline. Releases still pending at the deadline are abandoned and
//! reported, never awaited.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::client::ClientError;

/// Broadcast used to tell background tasks (config watchers, user loops)
/// that the framework is shutting down.
pub struct ShutdownSignal {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A named release operation.
pub type ReleaseTask = (String, BoxFuture<'static, Result<(), ClientError>>);

/// Outcome of [`release_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Released cleanly.
    pub released: Vec<String>,
    /// Release returned an error or panicked, with the reason.
    pub failed: Vec<(String, String)>,
    /// Still pending when the deadline passed.
    pub timed_out: Vec<String>,
}

impl ShutdownReport {
    /// True when every release finished before the deadline.
    pub fn completed_in_time(&self) -> bool {
        self.timed_out.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

/// Run every release concurrently, giving up on stragglers after `timeout`.
pub async fn release_all(tasks: Vec<ReleaseTask>, timeout: Duration) -> ShutdownReport {
    let deadline = Instant::now() + timeout;
    let mut pending: BTreeSet<String> = tasks.iter().map(|(name, _)| name.clone()).collect();
    let mut running: FuturesUnordered<_> = tasks
        .into_iter()
        .map(|(name, task)| async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            (name, outcome)
        })
        .collect();

    let mut report = ShutdownReport::default();
    loop {
        match tokio::time::timeout_at(deadline, running.next()).await {
            Ok(Some((name, outcome))) => {
                pending.remove(&name);
                match outcome {
                    Ok(Ok(())) => report.released.push(name),
                    Ok(Err(e)) => report.failed.push((name, e.to_string())),
                    Err(_) => report.failed.push((name, "release panicked".to_string())),
                }
            }
            Ok(None) => break,
            Err(_) => {
                report.timed_out = pending.into_iter().collect();
                break;
            }
        }
    }
    report.released.sort();
    report.failed.sort();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StoreError;

    fn task(name: &str, fut: impl std::future::Future<Output = Result<(), ClientError>> + Send + 'static) -> ReleaseTask {
        (name.to_string(), fut.boxed())
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_release_times_out() {
        let started = Instant::now();
        let report = release_all(
            vec![
                task("fast", async { Ok(()) }),
                task("hang", std::future::pending()),
                task("broken", async { Err(StoreError::new("quit failed").into()) }),
            ],
            Duration::from_millis(200),
        )
        .await;

        assert_eq!(started.elapsed(), Duration::from_millis(200));
        assert_eq!(report.released, vec!["fast"]);
        assert_eq!(report.failed, vec![("broken".to_string(), "quit failed".to_string())]);
        assert_eq!(report.timed_out, vec!["hang"]);
        assert!(!report.completed_in_time());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_release_before_deadline() {
        let started = Instant::now();
        let report = release_all(
            vec![
                task("a", async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(())
                }),
                task("b", async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(())
                }),
            ],
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(started.elapsed(), Duration::from_millis(30));
        assert!(report.is_clean());
        assert_eq!(report.released, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_panicking_release_is_contained() {
        let report = release_all(
            vec![task("boom", async {
                if true {
                    panic!("disconnect bug");
                }
                Ok(())
            })],
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(report.failed[0].0, "boom");
    }

    #[tokio::test]
    async fn test_signal_reaches_subscribers() {
        let signal = ShutdownSignal::new();
        let mut rx = signal.subscribe();
        assert_eq!(signal.receiver_count(), 1);
        signal.trigger();
        assert!(rx.recv().await.is_ok());
    }
}
