//! Per-forum state kept alongside the cached taxonomy: favorites and
//! thread-list refresh times.

use chrono::{DateTime, Duration, Utc};
use tokio_rusqlite::rusqlite::types::Value;

use super::connection::CacheDb;
use super::queries::next_favorite_index;
use super::schema::EntityKind;
use super::workspace::{Identity, Record, Workspace, flag, integer, timestamp};
use crate::Error;
use crate::clock::decode_timestamp;

/// How long a forum's thread list stays fresh.
pub fn forum_refresh_interval() -> Duration {
    Duration::minutes(15)
}

/// Which of a forum's two thread-list refresh times to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListFilter {
    Unfiltered,
    Filtered,
}

impl ListFilter {
    fn column(self) -> &'static str {
        match self {
            ListFilter::Unfiltered => "last_refresh",
            ListFilter::Filtered => "last_filtered_refresh",
        }
    }
}

fn forum(ws: &Workspace<'_>, forum_id: &str) -> Result<Record, Error> {
    let identity = Identity::new(EntityKind::Forum).with("forum_id", forum_id);
    if identity.is_empty() {
        return Err(Error::InvalidInput("forum id must not be empty".into()));
    }
    ws.find(&identity)?.into_iter().next().ok_or_else(|| Error::UnknownEntity(identity.to_string()))
}

impl CacheDb {
    /// Mark or unmark a forum as a favorite.
    ///
    /// A newly favorited forum goes to the end of the favorites list.
    pub async fn set_forum_favorite(&self, forum_id: &str, favorite: bool) -> Result<(), Error> {
        let forum_id = forum_id.to_string();
        self.perform("set favorite", move |ws| {
            let mut record = forum(ws, &forum_id)?;
            if record.flag("favorite") == favorite {
                return Ok(());
            }
            let mut values = vec![("favorite", flag(favorite))];
            if favorite {
                values.push(("favorite_index", integer(next_favorite_index(ws.transaction())?)));
            }
            ws.update(&mut record, &values)?;
            tracing::debug!(forum_id = %forum_id, favorite, "updated favorite");
            Ok(())
        })
        .await
    }

    /// Rewrite favorite indexes to follow `forum_ids` order.
    pub async fn reorder_favorites(&self, forum_ids: &[&str]) -> Result<(), Error> {
        let forum_ids: Vec<String> = forum_ids.iter().map(|id| id.to_string()).collect();
        self.perform("reorder favorites", move |ws| {
            for (i, forum_id) in forum_ids.iter().enumerate() {
                let mut record = forum(ws, forum_id)?;
                ws.update(&mut record, &[("favorite", flag(true)), ("favorite_index", integer(i as i64))])?;
            }
            Ok(())
        })
        .await
    }

    pub async fn should_refresh_forum(&self, forum_id: &str) -> Result<bool, Error> {
        self.forum_is_stale(forum_id, ListFilter::Unfiltered).await
    }

    pub async fn did_refresh_forum(&self, forum_id: &str) -> Result<(), Error> {
        self.stamp_forum(forum_id, ListFilter::Unfiltered).await
    }

    pub async fn should_refresh_filtered_forum(&self, forum_id: &str) -> Result<bool, Error> {
        self.forum_is_stale(forum_id, ListFilter::Filtered).await
    }

    pub async fn did_refresh_filtered_forum(&self, forum_id: &str) -> Result<(), Error> {
        self.stamp_forum(forum_id, ListFilter::Filtered).await
    }

    /// Forget both refresh times of a forum.
    pub async fn forget_forum(&self, forum_id: &str) -> Result<(), Error> {
        let forum_id = forum_id.to_string();
        self.perform("forget forum", move |ws| {
            let mut record = forum(ws, &forum_id)?;
            ws.update(&mut record, &[("last_refresh", Value::Null), ("last_filtered_refresh", Value::Null)])?;
            Ok(())
        })
        .await
    }

    async fn forum_is_stale(&self, forum_id: &str, filter: ListFilter) -> Result<bool, Error> {
        let forum_id = forum_id.to_string();
        let last: Option<DateTime<Utc>> = self
            .perform("read forum refresh", move |ws| {
                let record = forum(ws, &forum_id)?;
                record.text(filter.column()).map(decode_timestamp).transpose()
            })
            .await?;
        let now = self.clock().now();
        Ok(last.is_none_or(|last| now - last > forum_refresh_interval()))
    }

    async fn stamp_forum(&self, forum_id: &str, filter: ListFilter) -> Result<(), Error> {
        let forum_id = forum_id.to_string();
        self.perform("stamp forum refresh", move |ws| {
            let mut record = forum(ws, &forum_id)?;
            let now = ws.now();
            ws.update(&mut record, &[(filter.column(), timestamp(now))])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;
    use crate::cache::queries::CachedForum;
    use crate::cache::workspace::text;
    use crate::clock::ManualClock;

    async fn seeded(clock: &ManualClock) -> CacheDb {
        let db = CacheDb::open_in_memory(Arc::new(clock.clone())).await.unwrap();
        db.perform("seed", |ws| {
            for id in ["1", "2", "3"] {
                ws.insert(EntityKind::Forum, &[("forum_id", text(id))])?;
            }
            Ok(())
        })
        .await
        .unwrap();
        db
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 2, 2, 2, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_favorites_append_and_reorder() {
        let clock = clock();
        let db = seeded(&clock).await;
        db.set_forum_favorite("2", true).await.unwrap();
        db.set_forum_favorite("1", true).await.unwrap();
        db.set_forum_favorite("1", true).await.unwrap();

        let ids = |forums: Vec<CachedForum>| forums.into_iter().filter_map(|f| f.forum_id).collect::<Vec<_>>();
        assert_eq!(ids(db.favorite_forums().await.unwrap()), ["2", "1"]);
        assert_eq!(db.next_favorite_index().await.unwrap(), 2);

        db.reorder_favorites(&["1", "2"]).await.unwrap();
        assert_eq!(ids(db.favorite_forums().await.unwrap()), ["1", "2"]);

        db.set_forum_favorite("1", false).await.unwrap();
        assert_eq!(ids(db.favorite_forums().await.unwrap()), ["2"]);
    }

    #[tokio::test]
    async fn test_concurrent_favorites_get_distinct_indexes() {
        let clock = clock();
        let db = seeded(&clock).await;
        let (a, b, c) =
            tokio::join!(db.set_forum_favorite("1", true), db.set_forum_favorite("2", true), db.set_forum_favorite("3", true));
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let mut indexes: Vec<i64> = db.favorite_forums().await.unwrap().iter().map(|f| f.favorite_index).collect();
        indexes.sort_unstable();
        assert_eq!(indexes, [0, 1, 2]);
        assert_eq!(db.next_favorite_index().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unknown_forum_is_an_error() {
        let clock = clock();
        let db = seeded(&clock).await;
        assert!(matches!(db.set_forum_favorite("99", true).await, Err(Error::UnknownEntity(_))));
        assert!(matches!(db.did_refresh_forum("").await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_forum_refresh_interval() {
        let clock = clock();
        let db = seeded(&clock).await;
        assert!(db.should_refresh_forum("3").await.unwrap());

        db.did_refresh_forum("3").await.unwrap();
        assert!(!db.should_refresh_forum("3").await.unwrap());
        assert!(db.should_refresh_filtered_forum("3").await.unwrap());

        clock.advance(Duration::minutes(16));
        assert!(db.should_refresh_forum("3").await.unwrap());

        db.did_refresh_filtered_forum("3").await.unwrap();
        db.forget_forum("3").await.unwrap();
        assert!(db.should_refresh_filtered_forum("3").await.unwrap());
    }
}
