//! Collaborators a scheduler drives: where snapshots come from, where they
//! go, and whether a refresh is allowed at all.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use forumcache_core::{CacheDb, Error, ResourceKind, Snapshot};

/// Produces a fresh snapshot of a resource kind. Transport, auth and scraping live behind this.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, kind: ResourceKind) -> Result<Snapshot, Error>;
}

/// Accepts fetched snapshots.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn apply(&self, snapshot: Snapshot) -> Result<(), Error>;
}

#[async_trait]
impl SnapshotSink for CacheDb {
    async fn apply(&self, snapshot: Snapshot) -> Result<(), Error> {
        self.upsert(snapshot).await.map(|_| ())
    }
}

/// Session and feature preconditions checked before every attempt.
pub trait RefreshGate: Send + Sync {
    fn is_logged_in(&self) -> bool;

    /// Feature gate for a kind, e.g. private messaging being enabled.
    fn is_enabled(&self, kind: ResourceKind) -> bool;

    fn allows(&self, kind: ResourceKind) -> bool {
        self.is_logged_in() && self.is_enabled(kind)
    }
}

/// A gate backed by two flags the host flips.
#[derive(Debug)]
pub struct StaticGate {
    logged_in: AtomicBool,
    messaging_enabled: AtomicBool,
}

impl StaticGate {
    pub fn new(logged_in: bool, messaging_enabled: bool) -> Self {
        Self { logged_in: AtomicBool::new(logged_in), messaging_enabled: AtomicBool::new(messaging_enabled) }
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::SeqCst);
    }

    pub fn set_messaging_enabled(&self, enabled: bool) {
        self.messaging_enabled.store(enabled, Ordering::SeqCst);
    }
}

impl Default for StaticGate {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl RefreshGate for StaticGate {
    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn is_enabled(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::PrivateMessagesInbox => self.messaging_enabled.load(Ordering::SeqCst),
            _ => true,
        }
    }
}
