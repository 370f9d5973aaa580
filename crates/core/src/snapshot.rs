//! Typed scrape results handed to the cache by the fetch layer.
//!
//! Scraping itself happens elsewhere; these are the value objects it produces.
//! Optional fields mean "not present on the page", and absent attributes are
//! left untouched by the upsert path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::ResourceKind;
use crate::tree::{concatenate, flatten};

/// A freshly fetched snapshot of one resource kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Snapshot {
    Announcements(AnnouncementListSnapshot),
    Avatar(AvatarSnapshot),
    Bookmarks(ThreadListSnapshot),
    ExternalStylesheet(StylesheetSnapshot),
    ForumList(IndexSnapshot),
    LoggedInUser(ProfileSnapshot),
    PrivateMessagesInbox(InboxSnapshot),
}

impl Snapshot {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Snapshot::Announcements(_) => ResourceKind::Announcements,
            Snapshot::Avatar(_) => ResourceKind::Avatar,
            Snapshot::Bookmarks(_) => ResourceKind::Bookmarks,
            Snapshot::ExternalStylesheet(_) => ResourceKind::ExternalStylesheet,
            Snapshot::ForumList(_) => ResourceKind::ForumList,
            Snapshot::LoggedInUser(_) => ResourceKind::LoggedInUser,
            Snapshot::PrivateMessagesInbox(_) => ResourceKind::PrivateMessagesInbox,
        }
    }

    /// Short description of the identities the snapshot carries, for logs.
    pub fn describe(&self) -> String {
        match self {
            Snapshot::Announcements(s) => format!("{} announcements", s.announcements.len()),
            Snapshot::Avatar(s) => format!("avatar of user {:?}", s.user.user_id),
            Snapshot::Bookmarks(s) => format!("{} bookmarked threads (page {})", s.threads.len(), s.page),
            Snapshot::ExternalStylesheet(s) => format!("stylesheet {}", s.url),
            Snapshot::ForumList(s) => format!("{} top-level forum groups", s.forums.len()),
            Snapshot::LoggedInUser(s) => format!("profile of user {:?}", s.user_id),
            Snapshot::PrivateMessagesInbox(s) => format!("{} private messages", s.messages.len()),
        }
    }
}

/// A user as referenced from another record: either key may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
}

impl UserRef {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), username: username.into() }
    }
}

/// The forum index: nested groups and forums plus the current user's profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    #[serde(default)]
    pub forums: Vec<ScrapedForum>,
    #[serde(default)]
    pub current_user: Option<ProfileSnapshot>,
}

impl IndexSnapshot {
    /// Every node of the taxonomy, depth-first, with its depth.
    ///
    /// Top-level nodes (depth 0) are groups; forums start at depth 1.
    pub fn all_forums(&self) -> impl Iterator<Item = (&ScrapedForum, usize)> + '_ {
        concatenate(self.forums.iter().map(|root| flatten(root, ScrapedForum::children)))
    }
}

/// One node of the forum taxonomy. Nodes without threads are groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapedForum {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub has_threads: bool,
    #[serde(default)]
    pub moderators: Vec<UserRef>,
    #[serde(default)]
    pub subforums: Vec<ScrapedForum>,
}

impl ScrapedForum {
    pub fn children(&self) -> &[ScrapedForum] {
        &self.subforums
    }
}

/// A user profile page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub custom_title_html: Option<String>,
    #[serde(default)]
    pub can_receive_private_messages: Option<bool>,
    #[serde(default)]
    pub regdate: Option<DateTime<Utc>>,
    #[serde(default)]
    pub post_count: Option<i64>,
}

/// The logged-in user's avatar, carried in their custom title.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvatarSnapshot {
    pub user: UserRef,
    pub custom_title_html: Option<String>,
}

/// A page of the bookmarked threads list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadListSnapshot {
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub threads: Vec<ThreadSnapshot>,
}

fn first_page() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub thread_id: String,
    pub title: String,
    #[serde(default)]
    pub forum_id: Option<String>,
    #[serde(default)]
    pub author: Option<UserRef>,
    #[serde(default)]
    pub reply_count: Option<i64>,
    #[serde(default)]
    pub last_post_at: Option<DateTime<Utc>>,
}

/// The private message inbox folder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboxSnapshot {
    #[serde(default)]
    pub messages: Vec<PrivateMessageSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrivateMessageSnapshot {
    pub message_id: String,
    pub subject: String,
    #[serde(default)]
    pub from: Option<UserRef>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seen: Option<bool>,
    #[serde(default)]
    pub replied: Option<bool>,
}

/// Site-wide announcements, in display order. Announcements carry no server id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementListSnapshot {
    #[serde(default)]
    pub announcements: Vec<AnnouncementSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementSnapshot {
    pub title: String,
    #[serde(default)]
    pub body_html: String,
    #[serde(default)]
    pub author_username: Option<String>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
}

/// An externally hosted stylesheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StylesheetSnapshot {
    pub url: String,
    pub css: String,
}
