//! Refresh records in the `key_values` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

use super::connection::CacheDb;
use crate::Error;
use crate::clock::{decode_timestamp, encode_timestamp};
use crate::tracker::KeyValueStore;

#[async_trait]
impl KeyValueStore for CacheDb {
    async fn timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, Error> {
        let key = key.to_string();
        let raw = self
            .conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let raw = conn
                    .query_row("SELECT timestamp FROM key_values WHERE key = ?1", params![key], |row| row.get(0))
                    .optional()?;
                Ok(raw)
            })
            .await
            .map_err(Error::from)?;
        raw.as_deref().map(decode_timestamp).transpose()
    }

    async fn set_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), Error> {
        let key = key.to_string();
        let at = encode_timestamp(at);
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO key_values (key, timestamp) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET timestamp = excluded.timestamp",
                    params![key, at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), Error> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare_cached("DELETE FROM key_values WHERE key = ?1")?;
                    for key in &keys {
                        stmt.execute(params![key])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::resource::ResourceKind;
    use crate::tracker::RefreshTracker;

    async fn open(clock: &ManualClock) -> CacheDb {
        CacheDb::open_in_memory(Arc::new(clock.clone())).await.unwrap()
    }

    #[tokio::test]
    async fn test_timestamp_roundtrip_and_overwrite() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let db = open(&clock).await;
        assert_eq!(db.timestamp("k").await.unwrap(), None);

        let first = clock.now();
        db.set_timestamp("k", first).await.unwrap();
        db.set_timestamp("k", first + Duration::minutes(1)).await.unwrap();
        assert_eq!(db.timestamp("k").await.unwrap(), Some(first + Duration::minutes(1)));

        db.remove(&["k", "missing"]).await.unwrap();
        assert_eq!(db.timestamp("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tracker_over_store_survives_reopen_of_handle() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let db = open(&clock).await;
        let tracker = RefreshTracker::new(Arc::new(db.clone()), Arc::new(clock.clone()));
        tracker.did_refresh(ResourceKind::Bookmarks).await.unwrap();

        let again = RefreshTracker::new(Arc::new(db), Arc::new(clock.clone()));
        assert!(!again.should_refresh(ResourceKind::Bookmarks).await.unwrap());
        clock.advance(Duration::minutes(11));
        assert!(again.should_refresh(ResourceKind::Bookmarks).await.unwrap());
    }
}
