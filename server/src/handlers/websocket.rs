//! WebSocket handler for the notification stream.
//!
//! Journal notifications reach the socket through the connection manager;
//! the receive loop only answers lookups and pings.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tidemark_engine::{MemoryStorage, SharedJournal};
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(
    socket: WebSocket,
    journal: SharedJournal<MemoryStorage>,
    conn_manager: Arc<ConnectionManager>,
    client: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = conn_manager.register(client.clone(), tx);

    tracing::info!(
        conn_id = %conn_id,
        client = %client,
        "WebSocket client connected"
    );

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    let welcome = ServerMessage::Welcome {
        root: journal.with(|j| j.root_path().clone()),
        connections: conn_manager.connection_count(),
    };
    conn_manager.send_to(&conn_id, welcome);

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &journal);
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        client = %client,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return a server response.
fn process_message(text: &str, journal: &SharedJournal<MemoryStorage>) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };

    match client_msg {
        ClientMessage::Lookup { path, request_id } => {
            let entry = journal.with(|j| j.lookup(&path).copied());
            ServerMessage::Entry {
                path,
                entry,
                request_id,
            }
        }
        ClientMessage::Ping => ServerMessage::Pong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_engine::{ChangeRecord, EntryMetadata, FsPath, Journal, JournalOptions};

    fn journal() -> SharedJournal<MemoryStorage> {
        let mut journal = Journal::open(
            MemoryStorage::new(),
            FsPath::parse("sync").unwrap(),
            JournalOptions::default(),
        )
        .unwrap();
        journal
            .merge(vec![ChangeRecord::created(
                FsPath::parse("sync/notes.md").unwrap(),
                EntryMetadata::file(12),
            )])
            .unwrap();
        SharedJournal::new(journal)
    }

    #[test]
    fn test_lookup_reports_index_entry() {
        let journal = journal();

        let response = process_message(
            r#"{"type":"lookup","path":"sync/NOTES.md","request_id":"7"}"#,
            &journal,
        );
        match response {
            ServerMessage::Entry {
                entry, request_id, ..
            } => {
                let entry = entry.unwrap();
                assert!(entry.pending);
                assert!(!entry.is_folder);
                assert_eq!(request_id.as_deref(), Some("7"));
            }
            other => panic!("Expected Entry, got {other:?}"),
        }

        let response = process_message(r#"{"type":"lookup","path":"sync/other"}"#, &journal);
        assert!(matches!(response, ServerMessage::Entry { entry: None, .. }));
    }

    #[test]
    fn test_invalid_message() {
        let journal = journal();
        assert!(matches!(
            process_message("not json", &journal),
            ServerMessage::Error { .. }
        ));
        assert!(matches!(
            process_message(r#"{"type":"ping"}"#, &journal),
            ServerMessage::Pong
        ));
    }
}
