//! Frames exchanged over `/ws`.
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};

use super::registry::ConnectionId;
use crate::notification::format::FormattedNotification;

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate(Authenticate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authenticate {
    /// Missing is treated the same as empty: a protocol violation.
    #[serde(default)]
    pub user_id: String,
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected(Connected),
    Notification(FormattedNotification),
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub connection_id: ConnectionId,
    pub user_id: String,
}

impl ClientMessage {
    pub fn authenticate(user_id: impl Into<String>) -> Self {
        ClientMessage::Authenticate(Authenticate {
            user_id: user_id.into(),
        })
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> String {
        // enum of plain strings, cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_authenticate_wire_format() {
        let v: serde_json::Value =
            serde_json::from_str(&ClientMessage::authenticate("user-1").to_json()).unwrap();
        assert_eq!(v, json!({"event": "authenticate", "data": {"userId": "user-1"}}));
    }

    #[test]
    fn test_authenticate_without_user_id_parses_as_empty() {
        let msg = ClientMessage::parse(r#"{"event":"authenticate","data":{}}"#).unwrap();
        assert_eq!(msg, ClientMessage::authenticate(""));
    }

    #[test]
    fn test_unknown_client_event_is_rejected() {
        assert!(ClientMessage::parse(r#"{"event":"subscribe","data":{}}"#).is_err());
        assert!(ClientMessage::parse("hello").is_err());
    }

    #[test]
    fn test_connected_wire_format() {
        let msg = ServerMessage::Connected(Connected {
            connection_id: ConnectionId::from("sock-A"),
            user_id: "user-1".into(),
        });
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["event"], "connected");
        assert_eq!(v["data"]["connectionId"], "sock-A");
        assert_eq!(v["data"]["userId"], "user-1");
    }

    #[test]
    fn test_error_wire_format() {
        let msg = ServerMessage::Error {
            message: "userId is required".into(),
        };
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v, json!({"event": "error", "data": {"message": "userId is required"}}));
    }
}
