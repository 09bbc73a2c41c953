use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A durable notification row. The shape of `content` is determined by `type`.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub r#type: String, // 'type' is a reserved keyword
    pub content: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        NotificationKind::from(self.r#type.as_str())
    }
}

/// Input to `NotificationStore::create`.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub content: serde_json::Value,
}

/// Discriminator stored in the `type` column.
///
/// The set is open: producers may emit tags this build does not know about,
/// which round-trip through `Other` untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    TeamAdded,
    TeamRemoved,
    Invite,
    Mention,
    System,
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::TeamAdded => "TEAM_ADDED",
            NotificationKind::TeamRemoved => "TEAM_REMOVED",
            NotificationKind::Invite => "INVITE",
            NotificationKind::Mention => "MENTION",
            NotificationKind::System => "SYSTEM",
            NotificationKind::Other(tag) => tag,
        }
    }
}

impl From<&str> for NotificationKind {
    fn from(tag: &str) -> Self {
        match tag {
            "TEAM_ADDED" => NotificationKind::TeamAdded,
            "TEAM_REMOVED" => NotificationKind::TeamRemoved,
            "INVITE" => NotificationKind::Invite,
            "MENTION" => NotificationKind::Mention,
            "SYSTEM" => NotificationKind::System,
            other => NotificationKind::Other(other.to_string()),
        }
    }
}

impl From<String> for NotificationKind {
    fn from(tag: String) -> Self {
        NotificationKind::from(tag.as_str())
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
