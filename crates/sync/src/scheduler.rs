//! Per-resource refresh scheduling.
//!
//! One [`RefreshScheduler`] runs per resource kind as its own task. It is a
//! small state machine:
//!
//! - `Idle`: nothing scheduled (backgrounded, or shut down)
//! - `Armed`: a timer is pending
//! - `InFlight`: a fetch and store are running
//!
//! Attempts never overlap, and at most one timer is outstanding. Each timer
//! is a sleep raced against its own [`CancellationToken`]; re-arming cancels
//! the previous token first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use forumcache_core::{Error, RefreshTracker, ResourceKind};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::{TimerReason, compute_delay};
use crate::fetch::{Fetcher, RefreshGate, SnapshotSink};
use crate::lifecycle::Lifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Armed,
    InFlight,
}

/// Observable state of one scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub kind: ResourceKind,
    pub phase: Phase,
    /// Attempts that got past the preconditions.
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_reason: Option<TimerReason>,
    pub next_fire_at: Option<DateTime<Utc>>,
}

impl SchedulerStatus {
    fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            phase: Phase::Idle,
            attempts: 0,
            successes: 0,
            failures: 0,
            last_reason: None,
            next_fire_at: None,
        }
    }
}

/// Everything a scheduler needs besides its kind.
#[derive(Clone)]
pub struct SchedulerContext {
    pub tracker: RefreshTracker,
    pub fetcher: Arc<dyn Fetcher>,
    pub sink: Arc<dyn SnapshotSink>,
    pub gate: Arc<dyn RefreshGate>,
}

/// Handle to a running scheduler task.
#[derive(Debug)]
pub struct RefreshScheduler {
    kind: ResourceKind,
    shutdown: CancellationToken,
    status: watch::Receiver<SchedulerStatus>,
    task: JoinHandle<()>,
}

impl RefreshScheduler {
    /// Start scheduling `kind`. The first timer is armed immediately.
    pub fn spawn(kind: ResourceKind, ctx: SchedulerContext, lifecycle: broadcast::Receiver<Lifecycle>) -> Self {
        Self::spawn_with_rng(kind, ctx, lifecycle, StdRng::from_entropy())
    }

    /// Like [`spawn`](Self::spawn) with a caller-supplied jitter source.
    pub fn spawn_with_rng(
        kind: ResourceKind, ctx: SchedulerContext, lifecycle: broadcast::Receiver<Lifecycle>, rng: StdRng,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let (status_tx, status) = watch::channel(SchedulerStatus::new(kind));
        let (fired_tx, fired_rx) = mpsc::channel(4);
        let worker = Worker {
            kind,
            ctx,
            rng,
            status: status_tx,
            shutdown: shutdown.clone(),
            timer: None,
            generation: 0,
            fired_tx,
            in_flight: None,
            backgrounded: false,
            foreground_pending: false,
        };
        let task = tokio::spawn(worker.run(lifecycle, fired_rx));
        Self { kind, shutdown, status, task }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn status(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }

    /// Cancel the pending timer, stop listening for lifecycle signals and wait for the task to end.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(kind = %self.kind, error = %e, "scheduler task failed");
        }
    }
}

struct Worker {
    kind: ResourceKind,
    ctx: SchedulerContext,
    rng: StdRng,
    status: watch::Sender<SchedulerStatus>,
    shutdown: CancellationToken,
    timer: Option<CancellationToken>,
    /// Incremented on every arm so a timer that fired just before being cancelled is ignored.
    generation: u64,
    fired_tx: mpsc::Sender<u64>,
    in_flight: Option<JoinHandle<Result<(), Error>>>,
    backgrounded: bool,
    foreground_pending: bool,
}

impl Worker {
    async fn run(mut self, mut lifecycle: broadcast::Receiver<Lifecycle>, mut fired_rx: mpsc::Receiver<u64>) {
        let shutdown = self.shutdown.clone();
        let mut listening = true;
        self.arm(TimerReason::Initialization).await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(generation) = fired_rx.recv() => {
                    if generation == self.generation && self.timer.is_some() {
                        self.fire().await;
                    }
                }
                signal = lifecycle.recv(), if listening => match signal {
                    Ok(Lifecycle::Foreground) => self.foreground().await,
                    Ok(Lifecycle::Background) => self.background(),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(kind = %self.kind, missed, "missed lifecycle signals");
                    }
                    Err(broadcast::error::RecvError::Closed) => listening = false,
                },
                outcome = join_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    self.complete(outcome).await;
                }
            }
        }

        self.cancel_timer();
        if let Some(attempt) = self.in_flight.take() {
            attempt.abort();
        }
        self.status.send_modify(|s| {
            s.phase = Phase::Idle;
            s.next_fire_at = None;
        });
        tracing::debug!(kind = %self.kind, "scheduler stopped");
    }

    fn cancel_timer(&mut self) {
        if let Some(token) = self.timer.take() {
            token.cancel();
        }
    }

    /// Arm the timer. Does nothing but go idle while backgrounded.
    async fn arm(&mut self, reason: TimerReason) {
        self.cancel_timer();
        if self.backgrounded {
            self.go_idle();
            return;
        }

        let now = self.ctx.tracker.now();
        let suggested = match self.ctx.tracker.suggested_next_refresh_time(self.kind).await {
            Ok(at) => at - now,
            Err(e) => {
                tracing::warn!(kind = %self.kind, error = %e, "cannot read refresh record, retrying soon");
                chrono::Duration::zero()
            }
        };
        let delay = compute_delay(reason, suggested, self.kind.backoff(), &mut self.rng);

        self.generation += 1;
        let generation = self.generation;
        let token = self.shutdown.child_token();
        let fired = self.fired_tx.clone();
        let timer = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = fired.send(generation).await;
                }
            }
        });
        self.timer = Some(token);

        let next = chrono::Duration::from_std(delay).ok().map(|d| now + d);
        tracing::debug!(kind = %self.kind, ?reason, ?delay, "armed refresh timer");
        self.status.send_modify(|s| {
            s.phase = Phase::Armed;
            s.last_reason = Some(reason);
            s.next_fire_at = next;
        });
    }

    fn go_idle(&mut self) {
        self.cancel_timer();
        self.status.send_modify(|s| {
            s.phase = Phase::Idle;
            s.next_fire_at = None;
        });
    }

    async fn fire(&mut self) {
        self.cancel_timer();
        if !self.ctx.gate.allows(self.kind) {
            tracing::debug!(kind = %self.kind, "refresh not allowed right now");
            self.arm(TimerReason::Failure).await;
            return;
        }
        match self.ctx.tracker.should_refresh(self.kind).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(kind = %self.kind, "still fresh");
                self.arm(TimerReason::Failure).await;
                return;
            }
            Err(e) => {
                tracing::warn!(kind = %self.kind, error = %e, "cannot read refresh record");
                self.arm(TimerReason::Failure).await;
                return;
            }
        }

        let kind = self.kind;
        let ctx = self.ctx.clone();
        self.in_flight = Some(tokio::spawn(async move { attempt(kind, ctx).await }));
        self.status.send_modify(|s| {
            s.phase = Phase::InFlight;
            s.attempts += 1;
            s.next_fire_at = None;
        });
    }

    async fn complete(&mut self, outcome: Result<(), Error>) {
        let reason = match outcome {
            Ok(()) => {
                tracing::info!(kind = %self.kind, "refreshed");
                self.status.send_modify(|s| s.successes += 1);
                TimerReason::Success
            }
            Err(e) => {
                tracing::warn!(kind = %self.kind, error = %e, transient = e.is_transient(), "refresh failed");
                self.status.send_modify(|s| s.failures += 1);
                TimerReason::Failure
            }
        };

        if self.backgrounded {
            self.go_idle();
        } else if std::mem::take(&mut self.foreground_pending) {
            self.arm(TimerReason::WillEnterForeground).await;
        } else {
            self.arm(reason).await;
        }
    }

    async fn foreground(&mut self) {
        self.backgrounded = false;
        if self.in_flight.is_some() {
            self.foreground_pending = true;
            return;
        }
        self.arm(TimerReason::WillEnterForeground).await;
    }

    fn background(&mut self) {
        self.backgrounded = true;
        self.foreground_pending = false;
        if self.in_flight.is_some() {
            self.cancel_timer();
        } else {
            self.go_idle();
        }
    }
}

async fn join_in_flight(attempt: &mut Option<JoinHandle<Result<(), Error>>>) -> Result<(), Error> {
    match attempt {
        Some(handle) => match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::FetchFailed(format!("refresh task ended abnormally: {e}"))),
        },
        None => std::future::pending().await,
    }
}

/// Fetch, store, and record one refresh.
async fn attempt(kind: ResourceKind, ctx: SchedulerContext) -> Result<(), Error> {
    let snapshot = ctx.fetcher.fetch(kind).await?;
    if snapshot.kind() != kind {
        return Err(Error::FetchFailed(format!("expected {kind} snapshot, got {}", snapshot.kind())));
    }
    ctx.sink.apply(snapshot).await?;
    ctx.tracker.did_refresh(kind).await
}
