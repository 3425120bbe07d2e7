//! Journal operations behind the HTTP routes.
//!
//! Mutations run under the journal lock and capture a snapshot for the state
//! file. After the lock is released the notifications are broadcast and the
//! snapshot is written.

use serde::{Deserialize, Serialize};
use tidemark_engine::{
    ChangeRecord, EventId, FsPath, Journal, MemoryStorage, Outcome, PreviousFallback,
    ServerUidId, SnapshotEntry, SyncPoint,
};

use crate::error::{AppError, Result};
use crate::websocket::ServerMessage;
use crate::AppState;

/// Changes to record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsRequest {
    pub records: Vec<ChangeRecord>,
    /// Overrides the configured rename fallback (`add_events` only)
    #[serde(default)]
    pub fallback: Option<PreviousFallback>,
}

/// Changes as the journal recorded them.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesResponse {
    pub changes: Vec<ChangeRecord>,
}

/// Remote identity for a pending event.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRequest {
    pub server_uid: String,
    #[serde(default)]
    pub revision: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    pub server_uid_id: ServerUidId,
}

/// A confirmed synchronization point.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPointRequest {
    pub remote_sync_id: String,
    #[serde(default)]
    pub confirmed_event_ids: Vec<EventId>,
    #[serde(default)]
    pub root_identity: Option<String>,
}

/// Traversal results for initial indexing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePathResponse {
    pub server_uid: String,
    pub path: FsPath,
}

/// Query parameters for recent changes.
#[derive(Debug, Deserialize)]
pub struct ChangesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// Largest page of recent changes served at once.
const MAX_LIMIT: usize = 10_000;

/// Run a mutation, then broadcast and persist its result.
///
/// Once the journal has committed, observers hear about the change even if
/// the state file cannot be written.
async fn mutate<T>(
    state: &AppState,
    op: impl FnOnce(&mut Journal<MemoryStorage>) -> tidemark_engine::error::Result<Outcome<T>>,
) -> Result<T> {
    let (outcome, pending) = state.journal.with(|journal| -> Result<_> {
        let outcome = op(journal)?;
        let pending = state.store.stage(journal)?;
        Ok((outcome, pending))
    })?;

    if !outcome.notifications.is_empty() {
        let count = outcome.notifications.len();
        let sent = state
            .conn_manager
            .broadcast_all(ServerMessage::notifications(outcome.notifications));
        tracing::debug!(notifications = count, recipients = sent, "Notifications broadcast");
    }

    state.store.flush(pending).await.map_err(AppError::Unsaved)?;

    Ok(outcome.value)
}

/// Record changes without merging them with pending ones.
pub async fn handle_add_events(state: &AppState, request: EventsRequest) -> Result<ChangesResponse> {
    let fallback = request
        .fallback
        .unwrap_or(state.config.journal_options().placeholders);
    tracing::debug!(records = request.records.len(), ?fallback, "add_events");

    let changes = mutate(state, |journal| {
        journal.add_events_with(request.records, fallback)
    })
    .await?;
    Ok(ChangesResponse { changes })
}

/// Merge changes with the pending ones.
pub async fn handle_merge(state: &AppState, request: EventsRequest) -> Result<ChangesResponse> {
    if request.fallback.is_some() {
        return Err(AppError::BadRequest(
            "fallback is only accepted by /events".into(),
        ));
    }
    tracing::debug!(records = request.records.len(), "merge");

    let changes = mutate(state, |journal| journal.merge(request.records)).await?;
    Ok(ChangesResponse { changes })
}

/// Feed an initial traversal into the journal.
pub async fn handle_index(state: &AppState, request: IndexRequest) -> Result<ChangesResponse> {
    let changes = mutate(state, |journal| journal.index_snapshot(request.entries)).await?;
    Ok(ChangesResponse { changes })
}

pub async fn handle_set_identity(
    state: &AppState,
    event_id: EventId,
    request: IdentityRequest,
) -> Result<IdentityResponse> {
    if request.server_uid.is_empty() {
        return Err(AppError::BadRequest("serverUid must not be empty".into()));
    }
    let server_uid_id = mutate(state, |journal| {
        journal.set_remote_identity(event_id, &request.server_uid, request.revision)
    })
    .await?;
    Ok(IdentityResponse { server_uid_id })
}

pub async fn handle_complete(state: &AppState, event_id: EventId) -> Result<()> {
    mutate(state, |journal| journal.mark_completed(event_id)).await
}

pub async fn handle_sync_point(state: &AppState, request: SyncPointRequest) -> Result<SyncPoint> {
    mutate(state, |journal| {
        journal.record_sync_point(
            &request.remote_sync_id,
            &request.confirmed_event_ids,
            request.root_identity.as_deref(),
        )
    })
    .await
}

pub fn handle_get_event(state: &AppState, event_id: EventId) -> Result<ChangeRecord> {
    Ok(state.journal.with(|journal| journal.get_by_event_id(event_id))?)
}

pub fn handle_recent_changes(state: &AppState, query: ChangesQuery) -> Result<ChangesResponse> {
    if query.limit == 0 || query.limit > MAX_LIMIT {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }
    let changes = state
        .journal
        .with(|journal| journal.recent_changes(query.limit))?;
    Ok(ChangesResponse { changes })
}

pub fn handle_pending_changes(state: &AppState) -> Result<ChangesResponse> {
    let changes = state.journal.with(|journal| journal.pending_changes())?;
    Ok(ChangesResponse { changes })
}

pub fn handle_latest_sync_point(state: &AppState) -> Result<SyncPoint> {
    state
        .journal
        .with(|journal| journal.latest_sync_point())?
        .ok_or_else(|| AppError::NotFound("no sync point recorded".into()))
}

pub fn handle_remote_path(state: &AppState, server_uid: String) -> Result<RemotePathResponse> {
    let path = state
        .journal
        .with(|journal| journal.get_path_for_remote_identity(&server_uid))?
        .ok_or_else(|| AppError::NotFound(format!("no item with remote identity {server_uid}")))?;
    Ok(RemotePathResponse { server_uid, path })
}
