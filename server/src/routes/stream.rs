//! Notification stream route.

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::handlers::handle_websocket_connection;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Name the client reports itself as
    #[serde(default)]
    pub client: Option<String>,
}

/// Create stream routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

/// GET /ws - Subscribe to journal notifications.
async fn upgrade(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let client = query.client.unwrap_or_else(|| "anonymous".to_string());
    ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, state.journal, state.conn_manager, client)
    })
}
