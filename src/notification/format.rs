//! Client-facing projection of a stored notification.
//!
//! A `FormattedNotification` is rebuilt on every delivery from the row's
//! `type` + `content`; it is never persisted. Team events surface the team and
//! project they refer to, every other tag degrades to the generic "default"
//! card using whatever fields the producer supplied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::notification::{Notification, NotificationKind};

/// Display format for `timestamp` (pt-BR locale, day first).
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";

pub const FALLBACK_USER: &str = "Um usuário";
pub const FALLBACK_ACTION: &str = "enviou uma notificação";
pub const FALLBACK_INITIALS: &str = "U";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedNotification {
    pub id: Uuid,
    pub timestamp: String,
    pub unread: bool,
    #[serde(flatten)]
    pub body: FormattedBody,
}

/// Type-specific flattened fields, tagged by the lower-snake `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormattedBody {
    TeamAdded(TeamDetails),
    TeamRemoved(TeamDetails),
    Default(GenericDetails),
}

impl FormattedBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            FormattedBody::TeamAdded(_) => "team_added",
            FormattedBody::TeamRemoved(_) => "team_removed",
            FormattedBody::Default(_) => "default",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TeamDetails {
    pub team_id: String,
    pub team_name: String,
    pub project_name: String,
    pub sender_name: String,
    pub project_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericDetails {
    pub image: String,
    pub initials: String,
    pub user: String,
    pub action: String,
    pub target: String,
}

/// Format a stored notification. Never fails: malformed or unknown content
/// falls back to defaults.
pub fn format_notification(notification: &Notification) -> FormattedNotification {
    FormattedNotification {
        id: notification.id,
        timestamp: format_timestamp(&notification.created_at),
        unread: !notification.read,
        body: format_body(&notification.kind(), &notification.content),
    }
}

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn format_body(kind: &NotificationKind, content: &Value) -> FormattedBody {
    match kind {
        NotificationKind::TeamAdded => FormattedBody::TeamAdded(team_details(content)),
        NotificationKind::TeamRemoved => FormattedBody::TeamRemoved(team_details(content)),
        NotificationKind::Invite
        | NotificationKind::Mention
        | NotificationKind::System
        | NotificationKind::Other(_) => FormattedBody::Default(generic_details(content)),
    }
}

/// Reads one string field from producer content. Anything that is not a
/// string reads as absent, without affecting the other fields.
fn field(content: &Value, key: &str) -> Option<String> {
    content.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn team_details(content: &Value) -> TeamDetails {
    TeamDetails {
        team_id: field(content, "teamId").unwrap_or_default(),
        team_name: field(content, "teamName").unwrap_or_default(),
        project_name: field(content, "projectName").unwrap_or_default(),
        sender_name: field(content, "senderName").unwrap_or_else(|| FALLBACK_USER.to_string()),
        project_id: field(content, "projectId").unwrap_or_default(),
    }
}

fn generic_details(content: &Value) -> GenericDetails {
    GenericDetails {
        image: field(content, "image").unwrap_or_default(),
        initials: field(content, "initials").unwrap_or_else(|| FALLBACK_INITIALS.to_string()),
        user: field(content, "user").unwrap_or_else(|| FALLBACK_USER.to_string()),
        action: field(content, "action").unwrap_or_else(|| FALLBACK_ACTION.to_string()),
        target: field(content, "target").unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(tag: &str, content: serde_json::Value) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id: "user-1".into(),
            r#type: tag.into(),
            content,
            read: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_team_added_surfaces_team_fields() {
        let n = row(
            "TEAM_ADDED",
            json!({"teamId": "t1", "teamName": "Eng", "projectId": "p1", "projectName": "Acme"}),
        );
        let f = format_notification(&n);
        assert!(f.unread);
        match &f.body {
            FormattedBody::TeamAdded(d) => {
                assert_eq!(d.team_id, "t1");
                assert_eq!(d.team_name, "Eng");
                assert_eq!(d.project_id, "p1");
                assert_eq!(d.project_name, "Acme");
                assert_eq!(d.sender_name, FALLBACK_USER);
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_wire_shape_is_flat_camel_case() {
        let n = row(
            "TEAM_REMOVED",
            json!({"teamId": "t9", "teamName": "Ops", "projectId": "p2", "projectName": "Beta", "senderName": "Ana"}),
        );
        let v = serde_json::to_value(format_notification(&n)).unwrap();
        assert_eq!(v["type"], "team_removed");
        assert_eq!(v["teamName"], "Ops");
        assert_eq!(v["senderName"], "Ana");
        assert_eq!(v["projectId"], "p2");
        assert_eq!(v["unread"], true);
        assert!(v.get("body").is_none());
    }

    #[test]
    fn test_unknown_type_degrades_to_default() {
        let f = format_notification(&row("UNKNOWN_TYPE", json!({})));
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["type"], "default");
        assert_eq!(v["user"], "Um usuário");
        assert_eq!(v["action"], "enviou uma notificação");
        assert_eq!(v["initials"], "U");
        assert_eq!(v["image"], "");
        assert_eq!(v["target"], "");
    }

    #[test]
    fn test_non_object_content_does_not_panic() {
        let f = format_notification(&row("TEAM_ADDED", json!("not an object")));
        assert_eq!(f.body.type_name(), "team_added");
        let f = format_notification(&row("MENTION", json!([1, 2, 3])));
        assert_eq!(f.body.type_name(), "default");
    }

    #[test]
    fn test_mistyped_team_field_keeps_the_others() {
        let f = format_notification(&row(
            "TEAM_ADDED",
            json!({"teamId": 42, "teamName": "Eng", "projectName": "Acme", "senderName": "Ana", "projectId": "p1"}),
        ));
        assert_eq!(
            f.body,
            FormattedBody::TeamAdded(TeamDetails {
                team_id: String::new(),
                team_name: "Eng".into(),
                project_name: "Acme".into(),
                sender_name: "Ana".into(),
                project_id: "p1".into(),
            })
        );
    }

    #[test]
    fn test_mistyped_generic_field_keeps_the_others() {
        let f = format_notification(&row("MENTION", json!({"user": "Bia", "target": 7, "initials": null})));
        match &f.body {
            FormattedBody::Default(d) => {
                assert_eq!(d.user, "Bia");
                assert_eq!(d.target, "");
                assert_eq!(d.initials, FALLBACK_INITIALS);
                assert_eq!(d.action, FALLBACK_ACTION);
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_generic_fields_pass_through() {
        let f = format_notification(&row(
            "MENTION",
            json!({"user": "Bia", "initials": "BS", "action": "mencionou você em", "target": "Roadmap", "image": "https://cdn/bia.png"}),
        ));
        assert_eq!(
            f.body,
            FormattedBody::Default(GenericDetails {
                image: "https://cdn/bia.png".into(),
                initials: "BS".into(),
                user: "Bia".into(),
                action: "mencionou você em".into(),
                target: "Roadmap".into(),
            })
        );
    }

    #[test]
    fn test_formatting_is_deterministic_apart_from_timestamp() {
        let content = json!({"teamId": "t1", "teamName": "Eng"});
        let a = format_body(&NotificationKind::TeamAdded, &content);
        let b = format_body(&NotificationKind::TeamAdded, &content);
        assert_eq!(a, b);
    }

    #[test]
    fn test_read_rows_are_not_unread() {
        let mut n = row("SYSTEM", json!({}));
        n.read = true;
        assert!(!format_notification(&n).unread);
    }

    #[test]
    fn test_timestamp_is_day_first() {
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(format_timestamp(&at), "07/03/2026, 14:05:09");
    }

    #[test]
    fn test_formatted_notification_deserializes_from_wire() {
        let v = json!({
            "id": Uuid::nil(),
            "timestamp": "01/01/2026, 00:00:00",
            "unread": true,
            "type": "team_added",
            "teamId": "t1",
            "teamName": "Eng",
            "projectName": "Acme",
            "senderName": "Ana",
            "projectId": "p1"
        });
        let f: FormattedNotification = serde_json::from_value(v).unwrap();
        assert_eq!(f.body.type_name(), "team_added");
    }
}
