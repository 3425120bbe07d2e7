//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tidemark_engine::{FsPath, IndexEntry, Notification};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask what the index knows about a path.
    Lookup {
        path: FsPath,
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once right after the connection opens.
    Welcome {
        root: FsPath,
        /// Number of connections, this one included
        connections: usize,
    },

    /// Journal notifications, in the order the journal produced them.
    Notifications {
        notifications: Vec<Notification>,
        sent_at: DateTime<Utc>,
    },

    /// Response to a lookup.
    Entry {
        path: FsPath,
        /// `None` when the path is not visible
        entry: Option<IndexEntry>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
        /// Request ID from the original request (if applicable)
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }

    /// Wrap notifications for broadcast.
    pub fn notifications(notifications: Vec<Notification>) -> Self {
        ServerMessage::Notifications {
            notifications,
            sent_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_engine::ChangeKind;

    #[test]
    fn test_client_message_deserialization() {
        let json = r#"{"type": "lookup", "path": "sync/docs/a.txt", "request_id": "r1"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Lookup { path, request_id } => {
                assert_eq!(path, FsPath::parse("sync/docs/a.txt").unwrap());
                assert_eq!(request_id.as_deref(), Some("r1"));
            }
            _ => panic!("Expected Lookup message"),
        }

        let json = r#"{"type": "ping"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "pull"}"#).is_err());
    }

    #[test]
    fn test_server_message_serialization() {
        let msg = ServerMessage::Pong;
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);

        let msg = ServerMessage::error("test error", Some("req-1".to_string()));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""message":"test error""#));
        assert!(json.contains(r#""request_id":"req-1""#));
    }

    #[test]
    fn test_notifications_serialization() {
        let msg = ServerMessage::notifications(vec![
            Notification::Changed {
                path: FsPath::parse("sync/a").unwrap(),
                kind: ChangeKind::Created,
                pending: true,
            },
            Notification::SyncedDelete {
                path: FsPath::parse("sync/b").unwrap(),
            },
        ]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "notifications");
        assert_eq!(value["notifications"][0]["type"], "changed");
        assert_eq!(value["notifications"][0]["path"], "sync/a");
        assert_eq!(value["notifications"][0]["kind"], "created");
        assert_eq!(value["notifications"][1]["type"], "synced_delete");
        assert!(value["sent_at"].is_string());
    }
}
