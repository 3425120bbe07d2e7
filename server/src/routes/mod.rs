//! HTTP route definitions.

mod health;
mod journal;
mod stream;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(journal::routes())
        .merge(stream::routes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::websocket::ServerMessage;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tidemark_engine::FsPath;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn test_state(dir: &tempfile::TempDir, auth_token: Option<&str>) -> AppState {
        state_at(dir.path().join("state.json"), auth_token)
    }

    fn state_at(state_path: std::path::PathBuf, auth_token: Option<&str>) -> AppState {
        AppState::open(Config {
            host: "127.0.0.1".into(),
            port: 0,
            sync_root: FsPath::parse("sync").unwrap(),
            state_path,
            case_sensitive: false,
            allow_placeholders: false,
            auth_token: auth_token.map(str::to_string),
        })
        .unwrap()
    }

    async fn call(
        state: &AppState,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = create_routes()
            .with_state(state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        // Extractor rejections answer in plain text
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    fn created(path: &str, is_folder: bool) -> Value {
        json!({ "kind": "created", "newPath": path, "metadata": { "isFolder": is_folder } })
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, None);
        let (status, body) = call(&state, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["syncRoot"], "sync");
    }

    #[tokio::test]
    async fn test_merge_persists_and_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.conn_manager.register("tray".into(), tx);

        // Child before its parent
        let (status, body) = call(
            &state,
            Method::POST,
            "/merge",
            Some(json!({ "records": [created("sync/docs/a.txt", false), created("sync/docs", true)] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changes"].as_array().unwrap().len(), 2);

        match rx.try_recv().unwrap() {
            ServerMessage::Notifications { notifications, .. } => {
                assert_eq!(notifications.len(), 2)
            }
            other => panic!("Expected notifications, got {other:?}"),
        }

        assert!(dir.path().join("state.json").exists());
        let (_, pending) = call(&state, Method::GET, "/changes/pending", None).await;
        assert_eq!(pending["changes"][0]["newPath"], "sync/docs");
        assert_eq!(pending["changes"][1]["newPath"], "sync/docs/a.txt");

        // A fresh daemon over the same state file sees the same journal
        let restarted = test_state(&dir, None);
        let (_, pending) = call(&restarted, Method::GET, "/changes/pending", None).await;
        assert_eq!(pending["changes"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unsaved_change_is_still_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        // The parent directory of the state file does not exist
        let state = state_at(dir.path().join("missing").join("state.json"), None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.conn_manager.register("tray".into(), tx);

        let (status, body) = call(
            &state,
            Method::POST,
            "/events",
            Some(json!({ "records": [created("sync/a", false)] })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Change committed but state could not be saved");

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::Notifications { .. }
        ));
        let (_, pending) = call(&state, Method::GET, "/changes/pending", None).await;
        assert_eq!(pending["changes"][0]["newPath"], "sync/a");
    }

    #[tokio::test]
    async fn test_identity_and_completion() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, None);

        let (_, body) = call(
            &state,
            Method::POST,
            "/events",
            Some(json!({ "records": [created("sync/photos", true)] })),
        )
        .await;
        let event_id = body["changes"][0]["eventId"].as_u64().unwrap();

        let uri = format!("/events/{event_id}/complete");
        let (status, _) = call(&state, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &state,
            Method::POST,
            &format!("/events/{event_id}/identity"),
            Some(json!({ "serverUid": "remote-7" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["serverUidId"].is_u64());

        let (status, _) = call(&state, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, pending) = call(&state, Method::GET, "/changes/pending", None).await;
        assert!(pending["changes"].as_array().unwrap().is_empty());

        let (status, body) = call(&state, Method::GET, "/remote/remote-7/path", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["path"], "sync/photos");

        let (status, body) = call(&state, Method::GET, &format!("/events/{event_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "created");

        let (_, recent) = call(&state, Method::GET, "/changes?limit=5", None).await;
        assert_eq!(recent["changes"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, None);

        let (status, body) = call(
            &state,
            Method::POST,
            "/events",
            Some(json!({ "records": [created("sync/missing/a.txt", false)] })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("missing parent"));
        assert!(!dir.path().join("state.json").exists());

        let (status, _) = call(&state, Method::GET, "/events/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&state, Method::GET, "/changes?limit=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&state, Method::GET, "/remote/nobody/path", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &state,
            Method::POST,
            "/merge",
            Some(json!({ "records": [], "fallback": "placeholder" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sync_points() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, None);

        let (status, _) = call(&state, Method::GET, "/sync-points/latest", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &state,
            Method::POST,
            "/sync-points",
            Some(json!({ "remoteSyncId": "cursor-1", "rootIdentity": "root-uid" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["remoteSyncId"], "cursor-1");

        let (status, body) = call(&state, Method::GET, "/sync-points/latest", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["remoteSyncId"], "cursor-1");
    }

    #[tokio::test]
    async fn test_index_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, None);

        let (status, body) = call(
            &state,
            Method::POST,
            "/index",
            Some(json!({ "entries": [
                { "path": "sync/music", "isFolder": true },
                { "path": "sync/music/song.mp3", "isFolder": false, "size": 4096 },
            ] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changes"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bearer_token() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, Some("s3cret"));

        let (status, _) = call(&state, Method::GET, "/changes/pending", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/changes/pending")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let response = create_routes()
            .with_state(state.clone())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Health stays open for local probes
        let (status, _) = call(&state, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
