//! Merging fetched snapshots into the cached object graph.
//!
//! Each snapshot kind maps onto one or more entity kinds. Records are found
//! by their natural keys (any key matching is enough), duplicates found that
//! way are merged into the oldest row, and only attributes whose value
//! actually changed are written. The whole snapshot is applied in one
//! transaction; if any step fails nothing is kept.

use std::collections::{BTreeSet, HashMap};

use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::types::Value;

use super::connection::CacheDb;
use super::schema::{EntityKind, EntityRef};
use super::workspace::{Assignment, Identity, Record, Workspace, flag, integer, reference, text, timestamp};
use crate::Error;
use crate::resource::ResourceKind;
use crate::snapshot::{
    AnnouncementListSnapshot, AvatarSnapshot, InboxSnapshot, IndexSnapshot, ProfileSnapshot, Snapshot,
    StylesheetSnapshot, ThreadListSnapshot, UserRef,
};

/// Threads per page of the bookmarks list.
const BOOKMARKS_PER_PAGE: i64 = 40;

/// Columns whose change means an announcement has new content.
const ANNOUNCEMENT_CONTENT: [&str; 3] = ["title", "body_html", "posted_at"];

/// Outcome of applying one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertReport {
    pub kind: ResourceKind,
    /// Records inserted or changed. Zero when the snapshot matched the cache exactly.
    pub touched: usize,
}

impl CacheDb {
    /// Apply a snapshot in a single transaction.
    ///
    /// On failure the transaction is rolled back, the error is logged with the
    /// snapshot kind, and the snapshot is discarded.
    pub async fn upsert(&self, snapshot: Snapshot) -> Result<UpsertReport, Error> {
        let kind = snapshot.kind();
        let description = snapshot.describe();
        let result = self.perform(kind.slug(), move |ws| apply(ws, &snapshot)).await;
        match &result {
            Ok(report) => tracing::debug!(kind = %kind, touched = report.touched, "applied snapshot"),
            Err(e) => tracing::error!(kind = %kind, snapshot = %description, error = %e, "discarding snapshot"),
        }
        result
    }
}

/// Apply `snapshot` to an open workspace.
pub fn apply(ws: &mut Workspace<'_>, snapshot: &Snapshot) -> Result<UpsertReport, Error> {
    match snapshot {
        Snapshot::Announcements(s) => upsert_announcements(ws, s)?,
        Snapshot::Avatar(s) => {
            upsert_avatar(ws, s)?;
        }
        Snapshot::Bookmarks(s) => upsert_bookmarks(ws, s)?,
        Snapshot::ExternalStylesheet(s) => {
            upsert_stylesheet(ws, s)?;
        }
        Snapshot::ForumList(s) => upsert_index(ws, s)?,
        Snapshot::LoggedInUser(s) => {
            upsert_profile(ws, s)?;
        }
        Snapshot::PrivateMessagesInbox(s) => upsert_inbox(ws, s)?,
    }
    Ok(UpsertReport { kind: snapshot.kind(), touched: ws.touched().len() })
}

fn upsert_logged(ws: &mut Workspace<'_>, identity: &Identity, values: &[Assignment]) -> Result<Record, Error> {
    ws.upsert(identity, values).inspect_err(|e| {
        tracing::error!(kind = %identity.kind(), identity = %identity, error = %e, "upsert failed");
    })
}

fn user_identity(user_id: &str, username: &str) -> Identity {
    Identity::new(EntityKind::User).with("user_id", user_id).with("username", username)
}

/// Upsert a referenced user. A reference with no keys refers to nobody.
fn upsert_user_ref(ws: &mut Workspace<'_>, user: &UserRef) -> Result<Option<EntityRef>, Error> {
    let identity = user_identity(&user.user_id, &user.username);
    if identity.is_empty() {
        return Ok(None);
    }
    Ok(Some(upsert_logged(ws, &identity, &[])?.entity()))
}

fn upsert_profile(ws: &mut Workspace<'_>, profile: &ProfileSnapshot) -> Result<Record, Error> {
    let mut values = Vec::new();
    if let Some(title) = &profile.custom_title_html {
        values.push(("custom_title_html", text(title.as_str())));
    }
    if let Some(can) = profile.can_receive_private_messages {
        values.push(("can_receive_private_messages", flag(can)));
    }
    if let Some(regdate) = profile.regdate {
        values.push(("regdate", timestamp(regdate)));
    }
    if let Some(count) = profile.post_count {
        values.push(("post_count", integer(count)));
    }
    upsert_logged(ws, &user_identity(&profile.user_id, &profile.username), &values)
}

fn upsert_avatar(ws: &mut Workspace<'_>, avatar: &AvatarSnapshot) -> Result<Record, Error> {
    let values: Vec<Assignment> =
        avatar.custom_title_html.iter().map(|title| ("custom_title_html", text(title.as_str()))).collect();
    upsert_logged(ws, &user_identity(&avatar.user.user_id, &avatar.user.username), &values)
}

fn upsert_stylesheet(ws: &mut Workspace<'_>, stylesheet: &StylesheetSnapshot) -> Result<Record, Error> {
    let identity = Identity::new(EntityKind::Stylesheet).with("url", &stylesheet.url);
    upsert_logged(ws, &identity, &[("css", text(stylesheet.css.as_str()))])
}

/// A forum already placed in the hierarchy, as seen by its children.
struct Placed {
    entity: EntityRef,
    shows_children: bool,
    visible: bool,
}

fn upsert_index(ws: &mut Workspace<'_>, index: &IndexSnapshot) -> Result<(), Error> {
    let mut groups: HashMap<&str, EntityRef> = HashMap::new();
    let mut forums: HashMap<&str, Record> = HashMap::new();
    let (mut group_index, mut forum_index) = (0i64, 0i64);

    // Every node exists before any link is set.
    for (node, _) in index.all_forums() {
        if node.has_threads {
            let identity = Identity::new(EntityKind::Forum).with("forum_id", &node.id);
            let record = upsert_logged(
                ws,
                &identity,
                &[("name", text(node.title.as_str())), ("list_index", integer(forum_index))],
            )?;
            forum_index += 1;

            let mut moderators = BTreeSet::new();
            for moderator in &node.moderators {
                if let Some(user) = upsert_user_ref(ws, moderator)? {
                    moderators.insert(user.id);
                }
            }
            ws.set_join_members("forum_moderators", "forum_ref", "user_ref", record.entity(), &moderators)?;
            forums.insert(node.id.as_str(), record);
        } else {
            let identity = Identity::new(EntityKind::ForumGroup).with("group_id", &node.id);
            let record = upsert_logged(
                ws,
                &identity,
                &[("name", text(node.title.as_str())), ("list_index", integer(group_index))],
            )?;
            group_index += 1;
            groups.insert(node.id.as_str(), record.entity());
        }
    }

    let mut current_group: Option<EntityRef> = None;
    let mut stack: Vec<Placed> = Vec::new();
    for (node, depth) in index.all_forums() {
        if !node.has_threads {
            current_group = groups.get(node.id.as_str()).copied();
            continue;
        }
        if depth == 0 {
            tracing::warn!(forum_id = %node.id, "forum at top level of index, expected a group");
        }
        stack.truncate(depth.saturating_sub(1));

        let Some(record) = forums.get_mut(node.id.as_str()) else {
            continue;
        };
        let parent = stack.last();
        let visible = parent.is_none_or(|p| p.shows_children && p.visible);
        ws.update(
            record,
            &[
                ("group_ref", reference(current_group)),
                ("parent_ref", reference(parent.map(|p| p.entity))),
                ("visible_in_forum_list", flag(visible)),
            ],
        )?;
        stack.push(Placed {
            entity: record.entity(),
            shows_children: record.flag("shows_children_in_forum_list"),
            visible: record.flag("visible_in_forum_list"),
        });
    }

    if let Some(profile) = &index.current_user {
        upsert_profile(ws, profile)?;
    }
    Ok(())
}

fn upsert_bookmarks(ws: &mut Workspace<'_>, list: &ThreadListSnapshot) -> Result<(), Error> {
    let offset = i64::from(list.page.max(1) - 1) * BOOKMARKS_PER_PAGE;
    let mut listed = BTreeSet::new();

    for (i, thread) in list.threads.iter().enumerate() {
        let mut values: Vec<Assignment> = vec![
            ("title", text(thread.title.as_str())),
            ("bookmarked", flag(true)),
            ("bookmark_list_index", integer(offset + i as i64)),
        ];
        if let Some(forum_id) = &thread.forum_id {
            let identity = Identity::new(EntityKind::Forum).with("forum_id", forum_id);
            if !identity.is_empty() {
                let forum = upsert_logged(ws, &identity, &[])?;
                values.push(("forum_ref", integer(forum.id())));
            }
        }
        if let Some(user) = thread.author.as_ref().map(|a| upsert_user_ref(ws, a)).transpose()?.flatten() {
            values.push(("author_ref", integer(user.id)));
        }
        if let Some(replies) = thread.reply_count {
            values.push(("reply_count", integer(replies)));
        }
        if let Some(at) = thread.last_post_at {
            values.push(("last_post_at", timestamp(at)));
        }
        let identity = Identity::new(EntityKind::Thread).with("thread_id", &thread.thread_id);
        listed.insert(upsert_logged(ws, &identity, &values)?.id());
    }

    if list.page <= 1 {
        for mut stale in ws.select(EntityKind::Thread, "bookmarked = 1", params![])? {
            if !listed.contains(&stale.id()) {
                ws.update(&mut stale, &[("bookmarked", flag(false)), ("bookmark_list_index", Value::Null)])?;
            }
        }
    }
    Ok(())
}

fn upsert_inbox(ws: &mut Workspace<'_>, inbox: &InboxSnapshot) -> Result<(), Error> {
    for message in &inbox.messages {
        let mut values: Vec<Assignment> = vec![("subject", text(message.subject.as_str()))];
        if let Some(user) = message.from.as_ref().map(|u| upsert_user_ref(ws, u)).transpose()?.flatten() {
            values.push(("from_ref", integer(user.id)));
        }
        if let Some(at) = message.sent_at {
            values.push(("sent_at", timestamp(at)));
        }
        if let Some(seen) = message.seen {
            values.push(("seen", flag(seen)));
        }
        if let Some(replied) = message.replied {
            values.push(("replied", flag(replied)));
        }
        let identity = Identity::new(EntityKind::PrivateMessage).with("message_id", &message.message_id);
        upsert_logged(ws, &identity, &values)?;
    }
    Ok(())
}

/// Announcements carry no id, so they are matched by list position.
fn upsert_announcements(ws: &mut Workspace<'_>, list: &AnnouncementListSnapshot) -> Result<(), Error> {
    for (i, announcement) in list.announcements.iter().enumerate() {
        let mut values: Vec<Assignment> = vec![("title", text(announcement.title.as_str())), ("active", flag(true))];
        if !announcement.body_html.is_empty() {
            values.push(("body_html", text(announcement.body_html.as_str())));
        }
        if let Some(at) = announcement.posted_at {
            values.push(("posted_at", timestamp(at)));
        }
        if let Some(username) = announcement.author_username.as_deref().filter(|u| !u.trim().is_empty()) {
            values.push(("author_username", text(username)));
            // No user id on the page: link only to a user already known by name.
            let known = ws.find(&Identity::new(EntityKind::User).with("username", username))?;
            if let Some(user) = known.first() {
                values.push(("author_ref", integer(user.id())));
            }
        }

        let identity = Identity::new(EntityKind::Announcement).with("list_index", i.to_string());
        match ws.find(&identity)?.into_iter().next() {
            Some(mut record) => {
                let changed = ws.update(&mut record, &values)?;
                if record.flag("has_been_seen") && changed.iter().any(|c| ANNOUNCEMENT_CONTENT.contains(c)) {
                    tracing::debug!(list_index = i, ?changed, "announcement content changed, marking unseen");
                    ws.update(&mut record, &[("has_been_seen", flag(false))])?;
                }
            }
            None => {
                upsert_logged(ws, &identity, &values)?;
            }
        }
    }

    let len = list.announcements.len() as i64;
    let surplus = ws.select(EntityKind::Announcement, "active = 1 AND CAST(list_index AS INTEGER) >= ?1", params![len])?;
    for mut record in surplus {
        ws.update(&mut record, &[("active", flag(false))])?;
    }
    Ok(())
}
