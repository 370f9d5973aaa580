//! Resource kinds with their refresh cadence.

use std::fmt;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// A category of remotely sourced content with its own TTL and refresh cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Announcements,
    Avatar,
    Bookmarks,
    ExternalStylesheet,
    ForumList,
    LoggedInUser,
    PrivateMessagesInbox,
}

/// Randomized short-term retry window used when a refresh is due soon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Suggested delays at or below this are replaced by a jittered retry.
    pub threshold: StdDuration,
    /// Minimum jittered delay.
    pub floor: StdDuration,
    /// Width of the uniform jitter added on top of `floor`.
    pub spread: StdDuration,
}

impl BackoffPolicy {
    pub const DEFAULT: BackoffPolicy = BackoffPolicy {
        threshold: StdDuration::from_secs(20),
        floor: StdDuration::from_secs(20),
        spread: StdDuration::from_secs(90),
    };
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Announcements,
        ResourceKind::Avatar,
        ResourceKind::Bookmarks,
        ResourceKind::ExternalStylesheet,
        ResourceKind::ForumList,
        ResourceKind::LoggedInUser,
        ResourceKind::PrivateMessagesInbox,
    ];

    /// Key of this kind's refresh record in the key-value store.
    pub fn key(self) -> &'static str {
        match self {
            ResourceKind::Announcements => "com.awfulapp.Awful.LastAnnouncementsRefreshDate",
            ResourceKind::Avatar => "LastLoggedInUserAvatarRefreshDate",
            ResourceKind::Bookmarks => "com.awfulapp.Awful.LastBookmarksRefreshDate",
            ResourceKind::ExternalStylesheet => "LastExternalStylesheetRefreshDate",
            ResourceKind::ForumList => "com.awfulapp.Awful.LastForumRefreshDate",
            ResourceKind::LoggedInUser => "LastLoggedInUserRefreshDate",
            ResourceKind::PrivateMessagesInbox => "LastPrivateMessageInboxRefreshDate",
        }
    }

    /// Time between refreshes.
    pub fn ttl(self) -> Duration {
        let seconds = match self {
            ResourceKind::Announcements => 60 * 60 * 20,
            ResourceKind::Avatar => 60 * 10,
            ResourceKind::Bookmarks => 60 * 10,
            ResourceKind::ExternalStylesheet => 60 * 60,
            ResourceKind::ForumList => 60 * 60 * 6,
            ResourceKind::LoggedInUser => 60 * 5,
            ResourceKind::PrivateMessagesInbox => 60 * 10,
        };
        Duration::seconds(seconds)
    }

    pub fn backoff(self) -> BackoffPolicy {
        BackoffPolicy::DEFAULT
    }

    /// Short stable name, used for file names and log fields.
    pub fn slug(self) -> &'static str {
        match self {
            ResourceKind::Announcements => "announcements",
            ResourceKind::Avatar => "avatar",
            ResourceKind::Bookmarks => "bookmarks",
            ResourceKind::ExternalStylesheet => "external_stylesheet",
            ResourceKind::ForumList => "forum_list",
            ResourceKind::LoggedInUser => "logged_in_user",
            ResourceKind::PrivateMessagesInbox => "private_messages_inbox",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_distinct() {
        let keys: HashSet<_> = ResourceKind::ALL.iter().map(|k| k.key()).collect();
        assert_eq!(keys.len(), ResourceKind::ALL.len());
    }

    #[test]
    fn test_forum_list_ttl() {
        assert_eq!(ResourceKind::ForumList.ttl(), Duration::hours(6));
        assert_eq!(ResourceKind::LoggedInUser.ttl(), Duration::minutes(5));
    }

    #[test]
    fn test_slug_matches_serde_name() {
        for kind in ResourceKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.slug()));
        }
    }
}
