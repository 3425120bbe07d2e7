//! Journal endpoint routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tidemark_engine::{ChangeRecord, EventId, SyncPoint};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_add_events, handle_complete, handle_get_event, handle_index, handle_latest_sync_point,
    handle_merge, handle_pending_changes, handle_recent_changes, handle_remote_path,
    handle_set_identity, handle_sync_point, ChangesQuery, ChangesResponse, EventsRequest,
    IdentityRequest, IdentityResponse, IndexRequest, RemotePathResponse, SyncPointRequest,
};
use crate::AppState;

/// Create journal routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(add_events))
        .route("/events/{id}", get(get_event))
        .route("/events/{id}/identity", post(set_identity))
        .route("/events/{id}/complete", post(complete))
        .route("/merge", post(merge))
        .route("/index", post(index))
        .route("/changes", get(recent_changes))
        .route("/changes/pending", get(pending_changes))
        .route("/sync-points", post(record_sync_point))
        .route("/sync-points/latest", get(latest_sync_point))
        .route("/remote/{uid}/path", get(remote_path))
}

/// POST /events - Record changes as given.
async fn add_events(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<EventsRequest>,
) -> Result<Json<ChangesResponse>> {
    Ok(Json(handle_add_events(&state, request).await?))
}

/// POST /merge - Merge changes with pending ones.
async fn merge(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<EventsRequest>,
) -> Result<Json<ChangesResponse>> {
    Ok(Json(handle_merge(&state, request).await?))
}

/// POST /index - Initial traversal of the sync root.
async fn index(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<IndexRequest>,
) -> Result<Json<ChangesResponse>> {
    Ok(Json(handle_index(&state, request).await?))
}

async fn get_event(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<EventId>,
) -> Result<Json<ChangeRecord>> {
    Ok(Json(handle_get_event(&state, id)?))
}

async fn set_identity(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<EventId>,
    Json(request): Json<IdentityRequest>,
) -> Result<Json<IdentityResponse>> {
    Ok(Json(handle_set_identity(&state, id, request).await?))
}

async fn complete(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<EventId>,
) -> Result<StatusCode> {
    handle_complete(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /changes?limit= - Most recent changes, newest first.
async fn recent_changes(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<ChangesResponse>> {
    Ok(Json(handle_recent_changes(&state, query)?))
}

/// GET /changes/pending - Pending changes in dependency order.
async fn pending_changes(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<ChangesResponse>> {
    Ok(Json(handle_pending_changes(&state)?))
}

async fn record_sync_point(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<SyncPointRequest>,
) -> Result<Json<SyncPoint>> {
    Ok(Json(handle_sync_point(&state, request).await?))
}

async fn latest_sync_point(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<SyncPoint>> {
    Ok(Json(handle_latest_sync_point(&state)?))
}

async fn remote_path(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(uid): Path<String>,
) -> Result<Json<RemotePathResponse>> {
    Ok(Json(handle_remote_path(&state, uid)?))
}
