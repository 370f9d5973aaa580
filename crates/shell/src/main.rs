//! forumcache shell entry point.
//!
//! Runs every refresh scheduler against a directory of JSON snapshots and
//! takes lifecycle commands (`foreground`, `background`, `logout`, `prune`)
//! on stdin. Logging goes to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use forumcache_core::{AppConfig, CacheDb, CachePruner, Clock, RefreshTracker, ResourceKind, SystemClock};
use forumcache_sync::{
    Lifecycle, LifecycleBus, PruneScheduler, RefreshScheduler, SchedulerContext, StaticGate,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod command;
mod fetcher;

use command::Command;
use fetcher::DirectoryFetcher;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    let snapshot_dir = config.require_snapshot_dir()?.clone();
    tracing::info!(db = %config.db_path.display(), snapshots = %snapshot_dir.display(), "starting forumcache shell");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let db = CacheDb::open(&config.db_path, clock.clone()).await.context("opening cache")?;
    let tracker = RefreshTracker::new(Arc::new(db.clone()), clock);
    let gate = Arc::new(StaticGate::new(config.logged_in, config.messaging_enabled));
    let bus = LifecycleBus::new();

    let ctx = SchedulerContext {
        tracker: tracker.clone(),
        fetcher: Arc::new(DirectoryFetcher::new(snapshot_dir)),
        sink: Arc::new(db.clone()),
        gate: gate.clone(),
    };
    let schedulers: Vec<RefreshScheduler> =
        ResourceKind::ALL.iter().map(|&kind| RefreshScheduler::spawn(kind, ctx.clone(), bus.subscribe())).collect();

    let pruner = Arc::new(CachePruner::new(db.clone(), config.retention()));
    let prune_timer = PruneScheduler::spawn(pruner.clone(), config.prune_delay(), bus.subscribe());

    bus.send(Lifecycle::Foreground);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    tracing::info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(Command::Foreground) => {
                        bus.send(Lifecycle::Foreground);
                    }
                    Ok(Command::Background) => {
                        bus.send(Lifecycle::Background);
                    }
                    Ok(Command::Logout) => {
                        if command::log_out(&gate, &tracker, &db).await {
                            tracing::info!("logged out");
                        }
                    }
                    Ok(Command::Prune) => match pruner.prune().await {
                        Ok(report) => println!("{report}"),
                        Err(e) => tracing::warn!(error = %e, "prune failed"),
                    },
                    Err(e) => tracing::warn!(error = %e, "ignoring input"),
                }
            }
        }
    }

    for scheduler in schedulers {
        scheduler.shutdown().await;
    }
    prune_timer.shutdown().await;
    tracing::info!("stopped");

    Ok(())
}
