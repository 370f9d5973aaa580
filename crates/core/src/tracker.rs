//! Per-resource staleness tracking.
//!
//! A [`RefreshTracker`] remembers when each [`ResourceKind`] was last
//! refreshed successfully and turns that into "should we refresh now?" and
//! "when should we next try?" answers. Timestamps live in a
//! [`KeyValueStore`] so they survive restarts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::Error;
use crate::clock::Clock;
use crate::resource::ResourceKind;

/// Timestamp persistence keyed by string.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, Error>;

    async fn set_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), Error>;

    /// Remove every listed key. Missing keys are ignored.
    async fn remove(&self, keys: &[&str]) -> Result<(), Error>;
}

/// Process-local key-value store.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    values: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, Error> {
        Ok(self.values.lock().unwrap_or_else(|e| e.into_inner()).get(key).copied())
    }

    async fn set_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), Error> {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).insert(key.to_string(), at);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), Error> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            values.remove(*key);
        }
        Ok(())
    }
}

/// Margin below which an overdue refresh is still treated as "on time".
fn overdue_margin() -> Duration {
    Duration::seconds(1)
}

/// Staleness bookkeeping for every resource kind.
#[derive(Clone)]
pub struct RefreshTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RefreshTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTracker").field("clock", &self.clock).finish_non_exhaustive()
    }
}

impl RefreshTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// When `kind` was last refreshed successfully, if ever.
    pub async fn last_refresh(&self, kind: ResourceKind) -> Result<Option<DateTime<Utc>>, Error> {
        self.store.timestamp(kind.key()).await
    }

    /// True when `kind` was never refreshed or its TTL has elapsed.
    pub async fn should_refresh(&self, kind: ResourceKind) -> Result<bool, Error> {
        let Some(last) = self.last_refresh(kind).await? else {
            return Ok(true);
        };
        Ok(self.clock.now() - last > kind.ttl())
    }

    /// Record a successful refresh of `kind` at the current time.
    pub async fn did_refresh(&self, kind: ResourceKind) -> Result<(), Error> {
        let now = self.clock.now();
        self.store.set_timestamp(kind.key(), now).await?;
        tracing::debug!(kind = %kind, at = %now, "recorded refresh");
        Ok(())
    }

    /// When the next refresh of `kind` should happen.
    ///
    /// Without a record this is one TTL from now, so a fresh install does not
    /// refresh everything at once. An overdue kind gets `now`; the result is
    /// never earlier than `now`.
    pub async fn suggested_next_refresh_time(&self, kind: ResourceKind) -> Result<DateTime<Utc>, Error> {
        let now = self.clock.now();
        let Some(last) = self.last_refresh(kind).await? else {
            return Ok(now + kind.ttl());
        };
        let elapsed = now - last;
        if elapsed > kind.ttl() + overdue_margin() {
            return Ok(now);
        }
        Ok(now + (kind.ttl() - elapsed).max(Duration::zero()))
    }

    /// Drop every refresh record, e.g. on logout.
    pub async fn forget_everything(&self) -> Result<(), Error> {
        let keys: Vec<&str> = ResourceKind::ALL.iter().map(|k| k.key()).collect();
        self.store.remove(&keys).await?;
        tracing::info!("forgot all refresh records");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn tracker() -> (RefreshTracker, ManualClock) {
        let clock = ManualClock::new(t0());
        let tracker = RefreshTracker::new(Arc::new(MemoryKeyValueStore::default()), Arc::new(clock.clone()));
        (tracker, clock)
    }

    #[tokio::test]
    async fn test_should_refresh_without_record() {
        let (tracker, _) = tracker();
        for kind in ResourceKind::ALL {
            assert!(tracker.should_refresh(kind).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_staleness_monotonicity() {
        let (tracker, clock) = tracker();
        for kind in ResourceKind::ALL {
            clock.set(t0());
            tracker.did_refresh(kind).await.unwrap();
            assert!(!tracker.should_refresh(kind).await.unwrap(), "{kind} fresh right after refresh");

            clock.advance(kind.ttl());
            assert!(!tracker.should_refresh(kind).await.unwrap(), "{kind} not stale at exactly ttl");

            clock.advance(Duration::seconds(1));
            assert!(tracker.should_refresh(kind).await.unwrap(), "{kind} stale after ttl");
        }
    }

    #[tokio::test]
    async fn test_did_refresh_is_idempotent() {
        let (tracker, clock) = tracker();
        tracker.did_refresh(ResourceKind::Bookmarks).await.unwrap();
        tracker.did_refresh(ResourceKind::Bookmarks).await.unwrap();
        assert_eq!(tracker.last_refresh(ResourceKind::Bookmarks).await.unwrap(), Some(clock.now()));
    }

    #[tokio::test]
    async fn test_suggested_time_without_record() {
        let (tracker, _) = tracker();
        let suggested = tracker.suggested_next_refresh_time(ResourceKind::ExternalStylesheet).await.unwrap();
        assert_eq!(suggested, t0() + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_suggested_time_within_ttl() {
        let (tracker, clock) = tracker();
        tracker.did_refresh(ResourceKind::Avatar).await.unwrap();
        clock.advance(Duration::minutes(4));
        let suggested = tracker.suggested_next_refresh_time(ResourceKind::Avatar).await.unwrap();
        assert_eq!(suggested, t0() + Duration::minutes(10));
    }

    #[tokio::test]
    async fn test_suggested_time_overdue() {
        let (tracker, clock) = tracker();
        tracker.did_refresh(ResourceKind::LoggedInUser).await.unwrap();
        clock.advance(Duration::minutes(5) + Duration::seconds(2));
        let suggested = tracker.suggested_next_refresh_time(ResourceKind::LoggedInUser).await.unwrap();
        assert_eq!(suggested, clock.now());
    }

    #[tokio::test]
    async fn test_suggested_time_within_rounding_margin() {
        let (tracker, clock) = tracker();
        tracker.did_refresh(ResourceKind::LoggedInUser).await.unwrap();
        clock.advance(Duration::minutes(5) + Duration::milliseconds(500));
        let suggested = tracker.suggested_next_refresh_time(ResourceKind::LoggedInUser).await.unwrap();
        assert_eq!(suggested, clock.now());
    }

    #[tokio::test]
    async fn test_forget_everything() {
        let (tracker, _) = tracker();
        for kind in ResourceKind::ALL {
            tracker.did_refresh(kind).await.unwrap();
        }
        tracker.forget_everything().await.unwrap();
        for kind in ResourceKind::ALL {
            assert!(tracker.last_refresh(kind).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_forum_list_scenario() {
        let (tracker, clock) = tracker();
        let kind = ResourceKind::ForumList;
        assert!(tracker.should_refresh(kind).await.unwrap());

        tracker.did_refresh(kind).await.unwrap();

        clock.set(t0() + Duration::hours(5));
        assert!(!tracker.should_refresh(kind).await.unwrap());

        let later = t0() + Duration::hours(6) + Duration::seconds(1);
        clock.set(later);
        assert!(tracker.should_refresh(kind).await.unwrap());
        assert_eq!(tracker.suggested_next_refresh_time(kind).await.unwrap(), later);

        clock.set(later + Duration::seconds(1));
        assert_eq!(tracker.suggested_next_refresh_time(kind).await.unwrap(), later + Duration::seconds(1));
    }
}
