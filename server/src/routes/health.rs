//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sync_root: String,
    /// Paths currently in the index
    pub indexed: usize,
    pub connections: usize,
    /// Distinct client names among the connections
    pub clients: usize,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (sync_root, indexed) = state
        .journal
        .with(|journal| (journal.root_path().to_string(), journal.index().count()));
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sync_root,
        indexed,
        connections: state.conn_manager.connection_count(),
        clients: state.conn_manager.client_count(),
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Tidemark Index Daemon"
}
