//! Read models over the cache, for showing content offline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row};

use super::connection::CacheDb;
use super::schema::{EntityKind, EntityRef};
use crate::Error;
use crate::clock::decode_timestamp;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedUser {
    pub entity: EntityRef,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub custom_title_html: Option<String>,
    pub can_receive_private_messages: Option<bool>,
    pub post_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedForum {
    pub entity: EntityRef,
    pub forum_id: Option<String>,
    pub name: Option<String>,
    pub group_name: Option<String>,
    pub parent: Option<EntityRef>,
    pub favorite: bool,
    pub favorite_index: i64,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedThread {
    pub entity: EntityRef,
    pub thread_id: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub reply_count: Option<i64>,
    pub last_post_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedMessage {
    pub entity: EntityRef,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub seen: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedAnnouncement {
    pub entity: EntityRef,
    pub title: Option<String>,
    pub body_html: Option<String>,
    pub author_username: Option<String>,
    pub has_been_seen: bool,
}

fn entity(kind: EntityKind, row: &Row<'_>) -> rusqlite::Result<EntityRef> {
    Ok(EntityRef::new(kind, row.get(0)?))
}

/// Decode an optional stored timestamp, treating unreadable text as absent.
fn optional_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|raw| decode_timestamp(&raw).inspect_err(|e| tracing::warn!(error = %e, "skipping timestamp")).ok())
}

const FORUM_SELECT: &str = "SELECT f.id, f.forum_id, f.name, g.name, f.parent_ref, f.favorite, f.favorite_index,
            f.visible_in_forum_list
     FROM forums f LEFT JOIN forum_groups g ON g.id = f.group_ref";

fn forum_row(row: &Row<'_>) -> rusqlite::Result<CachedForum> {
    Ok(CachedForum {
        entity: entity(EntityKind::Forum, row)?,
        forum_id: row.get(1)?,
        name: row.get(2)?,
        group_name: row.get(3)?,
        parent: row.get::<_, Option<i64>>(4)?.map(|id| EntityRef::new(EntityKind::Forum, id)),
        favorite: row.get(5)?,
        favorite_index: row.get(6)?,
        visible: row.get(7)?,
    })
}

/// One past the highest favorite index, or 0 without favorites.
pub(crate) fn next_favorite_index(conn: &rusqlite::Connection) -> Result<i64, Error> {
    let last: Option<i64> = conn
        .query_row(
            "SELECT favorite_index FROM forums WHERE favorite = 1 ORDER BY favorite_index DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(last.map_or(0, |i| i + 1))
}

impl CacheDb {
    /// Look up a user by server id.
    pub async fn user_by_id(&self, user_id: &str) -> Result<Option<CachedUser>, Error> {
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CachedUser>, Error> {
                let user = conn
                    .query_row(
                        "SELECT id, user_id, username, custom_title_html, can_receive_private_messages, post_count
                         FROM users WHERE user_id = ?1 ORDER BY id LIMIT 1",
                        params![user_id],
                        |row| {
                            Ok(CachedUser {
                                entity: entity(EntityKind::User, row)?,
                                user_id: row.get(1)?,
                                username: row.get(2)?,
                                custom_title_html: row.get(3)?,
                                can_receive_private_messages: row.get(4)?,
                                post_count: row.get(5)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(user)
            })
            .await
            .map_err(Error::from)
    }

    /// Every forum in index order: by group, then by position in the index.
    pub async fn forums(&self) -> Result<Vec<CachedForum>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<CachedForum>, Error> {
                let sql = format!("{FORUM_SELECT} ORDER BY g.list_index, f.list_index");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], forum_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn favorite_forums(&self) -> Result<Vec<CachedForum>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<CachedForum>, Error> {
                let sql = format!("{FORUM_SELECT} WHERE f.favorite = 1 ORDER BY f.favorite_index");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], forum_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    /// The favorite index a newly favorited forum should take.
    pub async fn next_favorite_index(&self) -> Result<i64, Error> {
        self.conn.call(|conn| next_favorite_index(conn)).await.map_err(Error::from)
    }

    pub async fn bookmarked_threads(&self) -> Result<Vec<CachedThread>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<CachedThread>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT t.id, t.thread_id, t.title, u.username, t.reply_count, t.last_post_at
                     FROM threads t LEFT JOIN users u ON u.id = t.author_ref
                     WHERE t.bookmarked = 1 ORDER BY t.bookmark_list_index",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(CachedThread {
                        entity: entity(EntityKind::Thread, row)?,
                        thread_id: row.get(1)?,
                        title: row.get(2)?,
                        author: row.get(3)?,
                        reply_count: row.get(4)?,
                        last_post_at: optional_timestamp(row.get(5)?),
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Private messages, newest first.
    pub async fn inbox(&self) -> Result<Vec<CachedMessage>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<CachedMessage>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT m.id, m.message_id, m.subject, u.username, m.sent_at, m.seen
                     FROM private_messages m LEFT JOIN users u ON u.id = m.from_ref
                     ORDER BY m.sent_at DESC, m.id DESC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(CachedMessage {
                        entity: entity(EntityKind::PrivateMessage, row)?,
                        message_id: row.get(1)?,
                        subject: row.get(2)?,
                        from: row.get(3)?,
                        sent_at: optional_timestamp(row.get(4)?),
                        seen: row.get(5)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn active_announcements(&self) -> Result<Vec<CachedAnnouncement>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<CachedAnnouncement>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, title, body_html, author_username, has_been_seen FROM announcements
                     WHERE active = 1 ORDER BY CAST(list_index AS INTEGER)",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(CachedAnnouncement {
                        entity: entity(EntityKind::Announcement, row)?,
                        title: row.get(1)?,
                        body_html: row.get(2)?,
                        author_username: row.get(3)?,
                        has_been_seen: row.get(4)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Cached CSS for a stylesheet URL.
    pub async fn stylesheet(&self, url: &str) -> Result<Option<String>, Error> {
        let url = url.to_string();
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let css = conn
                    .query_row("SELECT css FROM stylesheets WHERE url = ?1 ORDER BY id LIMIT 1", params![url], |row| {
                        row.get::<_, Option<String>>(0)
                    })
                    .optional()?;
                Ok(css.flatten())
            })
            .await
            .map_err(Error::from)
    }
}
