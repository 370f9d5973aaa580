//! Age-based eviction of cached records.
//!
//! Records of stampable kinds whose `last_modified` is older than the
//! retention window are deleted, unless a live caller holds them. The
//! liveness check, the deletes and the commit happen while the liveness
//! registry is frozen, so a record cannot be pinned in between.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};

use super::connection::CacheDb;
use super::schema::EntityKind;
use crate::Error;

/// Default retention window.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Per-kind counts for one prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub deleted: usize,
    pub skipped_live: usize,
}

/// What a prune pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub cutoff: Option<DateTime<Utc>>,
    pub kinds: BTreeMap<EntityKind, KindCounts>,
}

impl PruneReport {
    pub fn deleted(&self) -> usize {
        self.kinds.values().map(|c| c.deleted).sum()
    }

    pub fn skipped_live(&self) -> usize {
        self.kinds.values().map(|c| c.skipped_live).sum()
    }
}

impl fmt::Display for PruneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deleted {} ({} live skipped)", self.deleted(), self.skipped_live())?;
        for (kind, counts) in self.kinds.iter().filter(|(_, c)| c.deleted + c.skipped_live > 0) {
            write!(f, "; {kind}: {}/{}", counts.deleted, counts.skipped_live)?;
        }
        Ok(())
    }
}

/// Deletes expired records that no live caller holds.
#[derive(Debug, Clone)]
pub struct CachePruner {
    db: CacheDb,
    retention: Duration,
}

impl CachePruner {
    pub fn new(db: CacheDb, retention: Duration) -> Self {
        Self { db, retention }
    }

    pub fn with_retention_days(db: CacheDb, days: i64) -> Self {
        Self::new(db, Duration::days(days))
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Run one prune pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommitFailed`] when the deletes cannot be committed.
    /// Nothing is deleted in that case.
    pub async fn prune(&self) -> Result<PruneReport, Error> {
        let retention = self.retention;
        let result = self
            .db
            .perform_frozen("prune", move |ws, live| {
                let cutoff = ws.now() - retention;
                let mut report = PruneReport { cutoff: Some(cutoff), ..Default::default() };
                for kind in EntityKind::stampable() {
                    let counts = report.kinds.entry(kind).or_default();
                    for entity in ws.expired(kind, cutoff)? {
                        if live.contains(&entity) {
                            counts.skipped_live += 1;
                            continue;
                        }
                        ws.delete(entity)?;
                        counts.deleted += 1;
                    }
                }
                Ok(report)
            })
            .await;

        match &result {
            Ok(report) => tracing::info!(report = %report, "pruned cache"),
            Err(e @ Error::CommitFailed { .. }) => tracing::error!(error = %e, "prune commit failed"),
            Err(e) => tracing::warn!(error = %e, "prune failed"),
        }
        result
    }
}

impl CacheDb {
    /// Prune with the given retention window.
    pub async fn prune(&self, retention: Duration) -> Result<PruneReport, Error> {
        CachePruner::new(self.clone(), retention).prune().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use std::collections::BTreeSet;

    use tokio_rusqlite::rusqlite::{self, Transaction};

    use super::*;
    use crate::cache::schema::EntityRef;
    use crate::cache::stamp::PreCommitHook;
    use crate::cache::workspace::{Identity, integer, text};
    use crate::clock::ManualClock;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap())
    }

    async fn seed_user(db: &CacheDb, id: &str) -> EntityRef {
        let id = id.to_string();
        db.perform("seed", move |ws| Ok(ws.insert(EntityKind::User, &[("user_id", text(id))])?.entity())).await.unwrap()
    }

    async fn exists(db: &CacheDb, id: &str) -> bool {
        let identity = Identity::new(EntityKind::User).with("user_id", id);
        !db.perform("read", move |ws| ws.find(&identity)).await.unwrap().is_empty()
    }

    #[tokio::test]
    async fn test_prune_deletes_expired_records() {
        let clock = clock();
        let db = CacheDb::open_in_memory(Arc::new(clock.clone())).await.unwrap();
        seed_user(&db, "old").await;
        clock.advance(Duration::days(6));
        seed_user(&db, "recent").await;
        clock.advance(Duration::days(2));

        let report = CachePruner::with_retention_days(db.clone(), DEFAULT_RETENTION_DAYS).prune().await.unwrap();
        assert_eq!(report.deleted(), 1);
        assert_eq!(report.kinds[&EntityKind::User], KindCounts { deleted: 1, skipped_live: 0 });
        assert!(!exists(&db, "old").await);
        assert!(exists(&db, "recent").await);
    }

    #[tokio::test]
    async fn test_prune_skips_live_records() {
        let clock = clock();
        let db = CacheDb::open_in_memory(Arc::new(clock.clone())).await.unwrap();
        let user = seed_user(&db, "held").await;
        seed_user(&db, "loose").await;
        clock.advance(Duration::days(8));

        let handle = db.pin(user).await.unwrap().unwrap();
        let report = db.prune(Duration::days(7)).await.unwrap();
        assert_eq!(report.skipped_live(), 1);
        assert_eq!(report.deleted(), 1);
        assert!(exists(&db, "held").await);
        assert!(!exists(&db, "loose").await);

        drop(handle);
        let report = db.prune(Duration::days(7)).await.unwrap();
        assert_eq!(report.deleted(), 1);
        assert!(!exists(&db, "held").await);
    }

    #[tokio::test]
    async fn test_prune_leaves_unstamped_kinds_and_nulls_references() {
        let clock = clock();
        let db = CacheDb::open_in_memory(Arc::new(clock.clone())).await.unwrap();
        let (forum, author) = db
            .perform("seed", |ws| {
                let author = ws.insert(EntityKind::User, &[("user_id", text("a"))])?;
                let forum = ws.insert(EntityKind::Forum, &[("forum_id", text("f"))])?.entity();
                ws.insert(EntityKind::Stylesheet, &[("url", text("s.css"))])?;
                Ok((forum, author.entity()))
            })
            .await
            .unwrap();
        clock.advance(Duration::days(3));
        let kept = db
            .perform("seed thread", move |ws| {
                Ok(ws.insert(EntityKind::Thread, &[("thread_id", text("t")), ("author_ref", integer(author.id))])?.entity())
            })
            .await
            .unwrap();
        clock.advance(Duration::days(5));

        let report = db.prune(Duration::days(7)).await.unwrap();
        assert_eq!(report.deleted(), 1);

        let (forum_row, thread_row) = db
            .perform("read", move |ws| Ok((ws.get(forum)?, ws.get(kept)?)))
            .await
            .unwrap();
        assert!(forum_row.is_some());
        assert_eq!(thread_row.and_then(|t| t.integer("author_ref")), None);
    }

    struct RejectingHook;

    impl PreCommitHook for RejectingHook {
        fn will_commit(&self, _tx: &Transaction<'_>, _touched: &BTreeSet<EntityRef>) -> rusqlite::Result<()> {
            Err(rusqlite::Error::InvalidQuery)
        }
    }

    #[tokio::test]
    async fn test_commit_failure_is_fatal_and_deletes_nothing() {
        let clock = clock();
        let mut db = CacheDb::open_in_memory(Arc::new(clock.clone())).await.unwrap();
        seed_user(&db, "old").await;
        clock.advance(Duration::days(8));

        let reader = db.clone();
        db.register_hook(Arc::new(RejectingHook));
        let err = db.prune(Duration::days(7)).await.unwrap_err();
        assert!(matches!(err, Error::CommitFailed { operation: "prune", .. }), "{err}");
        assert!(exists(&reader, "old").await);

        let report = reader.prune(Duration::days(7)).await.unwrap();
        assert_eq!(report.deleted(), 1);
    }

    #[tokio::test]
    async fn test_empty_cache_prunes_nothing() {
        let db = CacheDb::open_in_memory(Arc::new(clock())).await.unwrap();
        let report = db.prune(Duration::days(7)).await.unwrap();
        assert_eq!(report.deleted(), 0);
        assert_eq!(report.to_string(), "deleted 0 (0 live skipped)");
    }
}
