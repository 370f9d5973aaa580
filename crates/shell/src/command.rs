//! Host commands read from stdin, one per line.

use std::str::FromStr;

use forumcache_core::{CacheDb, RefreshTracker};
use forumcache_sync::StaticGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Foreground,
    Background,
    Logout,
    /// Run a prune pass right away.
    Prune,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        match line.trim().to_ascii_lowercase().as_str() {
            "foreground" | "fg" => Ok(Command::Foreground),
            "background" | "bg" => Ok(Command::Background),
            "logout" => Ok(Command::Logout),
            "prune" => Ok(Command::Prune),
            other => Err(format!("unknown command {other:?}")),
        }
    }
}

/// Stop refreshing, forget every refresh record and empty the cache.
///
/// Store failures are logged, not returned; the shell keeps running. Returns
/// whether every step succeeded.
pub async fn log_out(gate: &StaticGate, tracker: &RefreshTracker, db: &CacheDb) -> bool {
    gate.set_logged_in(false);
    let mut clean = true;
    if let Err(e) = tracker.forget_everything().await {
        tracing::warn!(error = %e, "could not forget refresh records");
        clean = false;
    }
    if let Err(e) = db.reset().await {
        tracing::error!(error = %e, "could not reset cache");
        clean = false;
    }
    clean
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use forumcache_core::snapshot::StylesheetSnapshot;
    use forumcache_core::{Error, KeyValueStore, MemoryKeyValueStore, ResourceKind, Snapshot, SystemClock};
    use forumcache_sync::RefreshGate;

    use super::*;

    /// A store whose removals always fail.
    struct StuckStore;

    #[async_trait]
    impl KeyValueStore for StuckStore {
        async fn timestamp(&self, _key: &str) -> Result<Option<DateTime<Utc>>, Error> {
            Ok(None)
        }

        async fn set_timestamp(&self, _key: &str, _at: DateTime<Utc>) -> Result<(), Error> {
            Ok(())
        }

        async fn remove(&self, _keys: &[&str]) -> Result<(), Error> {
            Err(Error::InvalidInput("read-only store".into()))
        }
    }

    async fn seeded_db() -> CacheDb {
        let db = CacheDb::open_in_memory(Arc::new(SystemClock)).await.unwrap();
        db.upsert(Snapshot::ExternalStylesheet(StylesheetSnapshot { url: "site.css".into(), css: "a {}".into() }))
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_log_out_clears_everything() {
        let db = seeded_db().await;
        let tracker = RefreshTracker::new(Arc::new(MemoryKeyValueStore::default()), Arc::new(SystemClock));
        tracker.did_refresh(ResourceKind::Bookmarks).await.unwrap();
        let gate = StaticGate::default();

        assert!(log_out(&gate, &tracker, &db).await);
        assert!(!gate.is_logged_in());
        assert_eq!(tracker.last_refresh(ResourceKind::Bookmarks).await.unwrap(), None);
        assert_eq!(db.stylesheet("site.css").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_log_out_survives_store_failure() {
        let db = seeded_db().await;
        let tracker = RefreshTracker::new(Arc::new(StuckStore), Arc::new(SystemClock));
        let gate = StaticGate::default();

        assert!(!log_out(&gate, &tracker, &db).await);
        assert!(!gate.is_logged_in());
        assert_eq!(db.stylesheet("site.css").await.unwrap(), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!("foreground".parse(), Ok(Command::Foreground));
        assert_eq!("  BG \n".parse(), Ok(Command::Background));
        assert_eq!("logout".parse(), Ok(Command::Logout));
        assert_eq!("prune".parse(), Ok(Command::Prune));
        assert!("refresh".parse::<Command>().is_err());
    }
}
