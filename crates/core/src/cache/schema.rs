//! Entity kinds and the shape of their tables.

use std::fmt;

use serde::Serialize;

/// The kinds of record held in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    ForumGroup,
    Forum,
    Thread,
    PrivateMessage,
    Announcement,
    Stylesheet,
}

/// A to-many relationship owned by an entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToMany {
    /// Members point at the owner through a foreign-key column.
    ForeignKey { member: EntityKind, column: &'static str },
    /// Owner and member are paired in a join table.
    JoinTable { table: &'static str, owner_column: &'static str, member_column: &'static str },
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::User,
        EntityKind::ForumGroup,
        EntityKind::Forum,
        EntityKind::Thread,
        EntityKind::PrivateMessage,
        EntityKind::Announcement,
        EntityKind::Stylesheet,
    ];

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::ForumGroup => "forum_groups",
            EntityKind::Forum => "forums",
            EntityKind::Thread => "threads",
            EntityKind::PrivateMessage => "private_messages",
            EntityKind::Announcement => "announcements",
            EntityKind::Stylesheet => "stylesheets",
        }
    }

    /// Columns that identify a record, in priority order.
    pub fn natural_keys(self) -> &'static [&'static str] {
        match self {
            EntityKind::User => &["user_id", "username"],
            EntityKind::ForumGroup => &["group_id"],
            EntityKind::Forum => &["forum_id"],
            EntityKind::Thread => &["thread_id"],
            EntityKind::PrivateMessage => &["message_id"],
            EntityKind::Announcement => &["list_index"],
            EntityKind::Stylesheet => &["url"],
        }
    }

    /// Every column besides the row id.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            EntityKind::User => &[
                "user_id",
                "username",
                "custom_title_html",
                "can_receive_private_messages",
                "regdate",
                "post_count",
                "last_modified",
            ],
            EntityKind::ForumGroup => &["group_id", "name", "list_index"],
            EntityKind::Forum => &[
                "forum_id",
                "name",
                "list_index",
                "group_ref",
                "parent_ref",
                "favorite",
                "favorite_index",
                "shows_children_in_forum_list",
                "visible_in_forum_list",
                "last_refresh",
                "last_filtered_refresh",
            ],
            EntityKind::Thread => &[
                "thread_id",
                "title",
                "forum_ref",
                "author_ref",
                "reply_count",
                "last_post_at",
                "bookmarked",
                "bookmark_list_index",
                "last_modified",
            ],
            EntityKind::PrivateMessage => {
                &["message_id", "subject", "from_ref", "sent_at", "seen", "replied", "last_modified"]
            }
            EntityKind::Announcement => &[
                "list_index",
                "title",
                "body_html",
                "author_ref",
                "author_username",
                "posted_at",
                "has_been_seen",
                "active",
                "last_modified",
            ],
            EntityKind::Stylesheet => &["url", "css"],
        }
    }

    /// Whether records carry `last_modified` and take part in pruning.
    pub fn is_stampable(self) -> bool {
        self.columns().contains(&"last_modified")
    }

    /// To-many relationships that a duplicate merge must carry over to the survivor.
    pub fn to_many(self) -> &'static [ToMany] {
        match self {
            EntityKind::User => &[
                ToMany::ForeignKey { member: EntityKind::Thread, column: "author_ref" },
                ToMany::ForeignKey { member: EntityKind::PrivateMessage, column: "from_ref" },
                ToMany::ForeignKey { member: EntityKind::Announcement, column: "author_ref" },
                ToMany::JoinTable { table: "forum_moderators", owner_column: "user_ref", member_column: "forum_ref" },
            ],
            EntityKind::ForumGroup => &[ToMany::ForeignKey { member: EntityKind::Forum, column: "group_ref" }],
            EntityKind::Forum => &[
                ToMany::ForeignKey { member: EntityKind::Forum, column: "parent_ref" },
                ToMany::ForeignKey { member: EntityKind::Thread, column: "forum_ref" },
                ToMany::JoinTable { table: "forum_moderators", owner_column: "forum_ref", member_column: "user_ref" },
            ],
            EntityKind::Thread | EntityKind::PrivateMessage | EntityKind::Announcement | EntityKind::Stylesheet => &[],
        }
    }

    /// Kinds that carry `last_modified`.
    pub fn stampable() -> impl Iterator<Item = EntityKind> {
        Self::ALL.into_iter().filter(|k| k.is_stampable())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// A persisted record: its kind and internal row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_keys_are_columns() {
        for kind in EntityKind::ALL {
            for key in kind.natural_keys() {
                assert!(kind.columns().contains(key), "{kind} lacks column {key}");
            }
        }
    }

    #[test]
    fn test_stampable_kinds() {
        let stampable: Vec<_> = EntityKind::stampable().collect();
        assert_eq!(
            stampable,
            vec![EntityKind::User, EntityKind::Thread, EntityKind::PrivateMessage, EntityKind::Announcement]
        );
    }

    #[test]
    fn test_foreign_key_members_have_column() {
        for kind in EntityKind::ALL {
            for relation in kind.to_many() {
                if let ToMany::ForeignKey { member, column } = relation {
                    assert!(member.columns().contains(column), "{member} lacks {column}");
                }
            }
        }
    }
}
