//! Storage contract for the change journal.
//!
//! The journal never talks to a database directly. It opens a
//! [`Transaction`] through [`Storage::begin`] and works with plain rows:
//! events, journal rows, server-UID rows and sync points. Every mutation made
//! through a transaction becomes visible to other transactions only after
//! [`Transaction::commit`]; dropping a transaction without committing rolls
//! it back.

mod memory;

pub use memory::{Counters, MemoryStorage, MemoryTx};

use crate::{
    error::Result, ChangeKind, ChangeRecord, CorrelationId, EventId, EventOrder, PathCase, RowId,
    ServerUidId,
};
use serde::{Deserialize, Serialize};

/// A persisted change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    pub event_id: EventId,
    /// The change as recorded, with its identifiers filled in
    pub record: ChangeRecord,
    /// Batch this event was inserted with
    pub correlation: CorrelationId,
    /// Position inside the batch
    pub correlation_index: u32,
}

/// An event about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub record: ChangeRecord,
    pub correlation: CorrelationId,
    pub correlation_index: u32,
}

/// A persisted journal row: one representation of a logical item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalRow {
    pub row_id: RowId,
    /// Latest event applied to this row; `None` for the root and placeholders
    pub event_id: Option<EventId>,
    pub name: String,
    /// Containing folder; `None` only for the root row
    pub parent_row_id: Option<RowId>,
    /// Committed row this pending row supersedes
    pub previous_row_id: Option<RowId>,
    pub server_uid_id: Option<ServerUidId>,
    pub pending: bool,
    pub event_order: Option<EventOrder>,
    pub kind: ChangeKind,
    pub is_folder: bool,
}

impl JournalRow {
    /// Whether this is the root row.
    pub fn is_root(&self) -> bool {
        self.parent_row_id.is_none()
    }

    /// Convert into an insertable row, dropping the storage identifier.
    pub fn to_new(&self) -> NewJournalRow {
        NewJournalRow {
            event_id: self.event_id,
            name: self.name.clone(),
            parent_row_id: self.parent_row_id,
            previous_row_id: self.previous_row_id,
            server_uid_id: self.server_uid_id,
            pending: self.pending,
            event_order: self.event_order,
            kind: self.kind,
            is_folder: self.is_folder,
        }
    }
}

/// A journal row about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJournalRow {
    pub event_id: Option<EventId>,
    pub name: String,
    pub parent_row_id: Option<RowId>,
    pub previous_row_id: Option<RowId>,
    pub server_uid_id: Option<ServerUidId>,
    pub pending: bool,
    pub event_order: Option<EventOrder>,
    pub kind: ChangeKind,
    pub is_folder: bool,
}

impl NewJournalRow {
    /// Attach the storage identifier.
    pub fn with_id(self, row_id: RowId) -> JournalRow {
        JournalRow {
            row_id,
            event_id: self.event_id,
            name: self.name,
            parent_row_id: self.parent_row_id,
            previous_row_id: self.previous_row_id,
            server_uid_id: self.server_uid_id,
            pending: self.pending,
            event_order: self.event_order,
            kind: self.kind,
            is_folder: self.is_folder,
        }
    }
}

/// A remote identity known to the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerUidRow {
    pub server_uid_id: ServerUidId,
    /// `None` until the first successful sync of the item
    pub server_uid: Option<String>,
    pub revision: Option<String>,
}

/// A confirmed synchronization point reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPoint {
    pub sync_point_id: u64,
    pub remote_sync_id: String,
    pub confirmed_event_ids: Vec<EventId>,
    pub root_identity: Option<String>,
}

/// Filter for [`Transaction::select_rows`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
    /// Rows whose parent is any of these
    pub parent_in: Option<Vec<RowId>>,
    /// Rows with this name under the given comparison
    pub name: Option<(String, PathCase)>,
    pub pending: Option<bool>,
    pub previous: Option<RowId>,
    pub server_uid_id: Option<ServerUidId>,
    pub event_id: Option<EventId>,
}

impl RowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent_in(mut self, parents: Vec<RowId>) -> Self {
        self.parent_in = Some(parents);
        self
    }

    pub fn named(mut self, name: impl Into<String>, case: PathCase) -> Self {
        self.name = Some((name.into(), case));
        self
    }

    pub fn pending(mut self, pending: bool) -> Self {
        self.pending = Some(pending);
        self
    }

    pub fn previous(mut self, previous: RowId) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn server_uid_id(mut self, id: ServerUidId) -> Self {
        self.server_uid_id = Some(id);
        self
    }

    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Whether `row` passes every set condition.
    pub fn matches(&self, row: &JournalRow) -> bool {
        if let Some(parents) = &self.parent_in {
            match row.parent_row_id {
                Some(parent) if parents.contains(&parent) => {}
                _ => return false,
            }
        }
        if let Some((name, case)) = &self.name {
            if !case.eq_segment(&row.name, name) {
                return false;
            }
        }
        self.pending.map_or(true, |p| row.pending == p)
            && self.previous.map_or(true, |p| row.previous_row_id == Some(p))
            && self
                .server_uid_id
                .map_or(true, |id| row.server_uid_id == Some(id))
            && self.event_id.map_or(true, |id| row.event_id == Some(id))
    }
}

/// A serializable transaction over the journal tables.
///
/// Reads observe the transaction's own writes. Implementations must roll
/// back on drop unless [`Transaction::commit`] was called.
pub trait Transaction {
    // Events

    /// Insert events and return their identifiers in input order.
    fn insert_events(&mut self, events: Vec<NewEvent>) -> Result<Vec<EventId>>;

    fn event(&mut self, event_id: EventId) -> Result<Option<EventRow>>;

    fn update_event(&mut self, event: &EventRow) -> Result<()>;

    /// Events of one batch ordered by their position in it.
    fn events_by_correlation(&mut self, correlation: CorrelationId) -> Result<Vec<EventRow>>;

    /// Newest events first.
    fn recent_events(&mut self, limit: usize) -> Result<Vec<EventRow>>;

    // Journal rows

    /// Insert rows and return their identifiers in input order.
    fn insert_rows(&mut self, rows: Vec<NewJournalRow>) -> Result<Vec<RowId>>;

    fn update_row(&mut self, row: &JournalRow) -> Result<()>;

    fn delete_rows(&mut self, row_ids: &[RowId]) -> Result<()>;

    fn row(&mut self, row_id: RowId) -> Result<Option<JournalRow>>;

    /// Matching rows ordered by identifier.
    fn select_rows(&mut self, filter: &RowFilter) -> Result<Vec<JournalRow>>;

    // Server identities

    fn insert_server_uid(
        &mut self,
        server_uid: Option<String>,
        revision: Option<String>,
    ) -> Result<ServerUidId>;

    fn server_uid(&mut self, id: ServerUidId) -> Result<Option<ServerUidRow>>;

    fn find_server_uid(&mut self, server_uid: &str) -> Result<Option<ServerUidRow>>;

    fn update_server_uid(&mut self, row: &ServerUidRow) -> Result<()>;

    fn delete_server_uid(&mut self, id: ServerUidId) -> Result<()>;

    /// Where a retired identity key now points.
    fn forwarding(&mut self, id: ServerUidId) -> Result<Option<ServerUidId>>;

    fn set_forwarding(&mut self, from: ServerUidId, to: ServerUidId) -> Result<()>;

    /// Every retired key currently forwarding to `to`.
    fn forwarded_to(&mut self, to: ServerUidId) -> Result<Vec<ServerUidId>>;

    // Counters

    fn next_event_order(&mut self) -> Result<EventOrder>;

    fn next_correlation(&mut self) -> Result<CorrelationId>;

    // Sync points

    fn insert_sync_point(
        &mut self,
        remote_sync_id: String,
        confirmed_event_ids: Vec<EventId>,
        root_identity: Option<String>,
    ) -> Result<SyncPoint>;

    fn latest_sync_point(&mut self) -> Result<Option<SyncPoint>>;

    // Lifecycle

    fn commit(self) -> Result<()>;

    fn rollback(self) -> Result<()>;
}

/// A transactional store for the journal tables.
pub trait Storage {
    type Tx<'a>: Transaction
    where
        Self: 'a;

    /// Open a transaction. Only one may be open at a time.
    fn begin(&mut self) -> Result<Self::Tx<'_>>;
}
