//! Runs the cache pruner a short while after the app comes to the foreground.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forumcache_core::{CachePruner, Error, PruneReport};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::Lifecycle;

/// Something that can be pruned.
#[async_trait]
pub trait PruneTarget: Send + Sync {
    async fn prune(&self) -> Result<PruneReport, Error>;
}

#[async_trait]
impl PruneTarget for CachePruner {
    async fn prune(&self) -> Result<PruneReport, Error> {
        CachePruner::prune(self).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneStatus {
    pub armed: bool,
    pub runs: u64,
    pub failures: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_deleted: usize,
}

/// Handle to the prune timer task.
#[derive(Debug)]
pub struct PruneScheduler {
    shutdown: CancellationToken,
    status: watch::Receiver<PruneStatus>,
    task: JoinHandle<()>,
}

impl PruneScheduler {
    pub fn spawn(target: Arc<dyn PruneTarget>, delay: Duration, lifecycle: broadcast::Receiver<Lifecycle>) -> Self {
        let shutdown = CancellationToken::new();
        let (status_tx, status) = watch::channel(PruneStatus::default());
        let task = tokio::spawn(run(target, delay, lifecycle, status_tx, shutdown.clone()));
        Self { shutdown, status, task }
    }

    pub fn status(&self) -> watch::Receiver<PruneStatus> {
        self.status.clone()
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "prune timer task failed");
        }
    }
}

async fn run(
    target: Arc<dyn PruneTarget>, delay: Duration, mut lifecycle: broadcast::Receiver<Lifecycle>,
    status: watch::Sender<PruneStatus>, shutdown: CancellationToken,
) {
    let deadline = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(deadline);
    let mut armed = false;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            signal = lifecycle.recv() => match signal {
                Ok(Lifecycle::Foreground) => {
                    deadline.as_mut().reset(tokio::time::Instant::now() + delay);
                    armed = true;
                    status.send_modify(|s| s.armed = true);
                    tracing::debug!(?delay, "prune armed");
                }
                Ok(Lifecycle::Background) => {
                    if armed {
                        armed = false;
                        status.send_modify(|s| s.armed = false);
                        tracing::debug!("prune cancelled");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "prune timer missed lifecycle signals");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut deadline, if armed => {
                armed = false;
                let outcome = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    outcome = target.prune() => outcome,
                };
                status.send_modify(|s| {
                    s.armed = false;
                    s.runs += 1;
                    s.last_run_at = Some(Utc::now());
                    match &outcome {
                        Ok(report) => s.last_deleted = report.deleted(),
                        Err(_) => s.failures += 1,
                    }
                });
                if let Err(e) = outcome {
                    tracing::warn!(error = %e, "scheduled prune failed");
                }
            }
        }
    }

    status.send_modify(|s| s.armed = false);
    tracing::debug!("prune timer stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::lifecycle::LifecycleBus;

    #[derive(Default)]
    struct CountingTarget {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PruneTarget for CountingTarget {
        async fn prune(&self) -> Result<PruneReport, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::InvalidInput("retention window is empty".into()));
            }
            Ok(PruneReport::default())
        }
    }

    const DELAY: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn test_foreground_prunes_after_delay() {
        let bus = LifecycleBus::new();
        let target = Arc::new(CountingTarget::default());
        let scheduler = PruneScheduler::spawn(target.clone(), DELAY, bus.subscribe());
        let mut status = scheduler.status();

        bus.send(Lifecycle::Foreground);
        status.wait_for(|s| s.armed).await.unwrap();
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);

        let done = status.wait_for(|s| s.runs == 1).await.unwrap().clone();
        assert!(!done.armed);
        assert_eq!(done.failures, 0);
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cancels_pending_prune() {
        let bus = LifecycleBus::new();
        let target = Arc::new(CountingTarget::default());
        let scheduler = PruneScheduler::spawn(target.clone(), DELAY, bus.subscribe());
        let mut status = scheduler.status();

        bus.send(Lifecycle::Foreground);
        status.wait_for(|s| s.armed).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        bus.send(Lifecycle::Background);
        status.wait_for(|s| !s.armed).await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
        assert_eq!(status.borrow().runs, 0);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_prune_is_counted() {
        let bus = LifecycleBus::new();
        let target = Arc::new(CountingTarget { fail: true, ..Default::default() });
        let scheduler = PruneScheduler::spawn(target.clone(), DELAY, bus.subscribe());
        let mut status = scheduler.status();

        bus.send(Lifecycle::Foreground);
        let done = status.wait_for(|s| s.runs == 1).await.unwrap().clone();
        assert_eq!(done.failures, 1);
        scheduler.shutdown().await;
    }
}
