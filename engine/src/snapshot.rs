//! Snapshot types for persisting and restoring journal state.
//!
//! Snapshots are the bridge between [`MemoryStorage`](crate::MemoryStorage)
//! and a file on disk. Every table is exported in key order so the same
//! state always serializes to the same JSON.

use crate::{
    error::Result,
    storage::{Counters, EventRow, JournalRow, ServerUidRow, SyncPoint},
    Error, ServerUidId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of every journal table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    pub events: Vec<EventRow>,
    pub rows: Vec<JournalRow>,
    pub server_uids: Vec<ServerUidRow>,
    /// Retired identity key -> surviving key
    pub forwarding: BTreeMap<ServerUidId, ServerUidId>,
    pub sync_points: Vec<SyncPoint>,
    pub counters: Counters,
}

impl Default for JournalSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl JournalSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            events: Vec::new(),
            rows: Vec::new(),
            server_uids: Vec::new(),
            forwarding: BTreeMap::new(),
            sync_points: Vec::new(),
            counters: Counters::default(),
        }
    }

    /// Number of pending journal rows.
    pub fn pending_count(&self) -> usize {
        self.rows.iter().filter(|r| r.pending).count()
    }

    /// Check referential integrity of the exported tables.
    pub fn validate(&self) -> Result<()> {
        let row_ids: BTreeSet<_> = self.rows.iter().map(|r| r.row_id).collect();
        if row_ids.len() != self.rows.len() {
            return Err(Error::InvalidSnapshot("duplicate row id".into()));
        }

        let roots = self.rows.iter().filter(|r| r.is_root()).count();
        if !self.rows.is_empty() && roots != 1 {
            return Err(Error::InvalidSnapshot(format!(
                "expected exactly one root row, found {roots}"
            )));
        }

        for row in &self.rows {
            for (what, id) in [("parent", row.parent_row_id), ("previous", row.previous_row_id)] {
                if let Some(id) = id {
                    if !row_ids.contains(&id) {
                        return Err(Error::InvalidSnapshot(format!(
                            "row {} references missing {what} row {id}",
                            row.row_id
                        )));
                    }
                }
            }
            if row.row_id > self.counters.row_id {
                return Err(Error::InvalidSnapshot(format!(
                    "row {} is beyond the row counter {}",
                    row.row_id, self.counters.row_id
                )));
            }
        }

        if let Some(event) = self.events.iter().find(|e| e.event_id > self.counters.event_id) {
            return Err(Error::InvalidSnapshot(format!(
                "event {} is beyond the event counter {}",
                event.event_id, self.counters.event_id
            )));
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        // Validate format version
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub event_count: usize,
    pub row_count: usize,
    pub pending_count: usize,
    pub sync_point_count: usize,
}

impl From<&JournalSnapshot> for SnapshotMetadata {
    fn from(snapshot: &JournalSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            event_count: snapshot.events.len(),
            row_count: snapshot.rows.len(),
            pending_count: snapshot.pending_count(),
            sync_point_count: snapshot.sync_points.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChangeKind;

    fn row(row_id: u64, parent: Option<u64>, pending: bool) -> JournalRow {
        JournalRow {
            row_id,
            event_id: None,
            name: format!("n{row_id}"),
            parent_row_id: parent,
            previous_row_id: None,
            server_uid_id: None,
            pending,
            event_order: None,
            kind: ChangeKind::Created,
            is_folder: true,
        }
    }

    fn sample() -> JournalSnapshot {
        let mut snapshot = JournalSnapshot::new();
        snapshot.rows = vec![row(1, None, false), row(2, Some(1), true)];
        snapshot.counters.row_id = 2;
        snapshot
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = JournalSnapshot::new();
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert!(snapshot.rows.is_empty());
        snapshot.validate().unwrap();
    }

    #[test]
    fn json_roundtrip() {
        let snapshot = sample();
        let json = snapshot.to_json().unwrap();
        let restored = JournalSnapshot::from_json(&json).unwrap();
        assert_eq!(snapshot, restored);
        assert!(snapshot.to_json_pretty().unwrap().contains("\"formatVersion\": 1"));
    }

    #[test]
    fn reject_future_format_version() {
        let mut snapshot = sample();
        snapshot.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(matches!(
            JournalSnapshot::from_json(&json),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn validate_catches_dangling_references() {
        let mut snapshot = sample();
        snapshot.rows.push(row(3, Some(9), true));
        snapshot.counters.row_id = 3;
        assert!(matches!(snapshot.validate(), Err(Error::InvalidSnapshot(_))));

        let mut two_roots = sample();
        two_roots.rows.push(row(3, None, false));
        two_roots.counters.row_id = 3;
        assert!(two_roots.validate().is_err());

        let mut stale_counter = sample();
        stale_counter.counters.row_id = 1;
        assert!(stale_counter.validate().is_err());
    }

    #[test]
    fn metadata_counts() {
        let meta = SnapshotMetadata::from(&sample());
        assert_eq!(meta.row_count, 2);
        assert_eq!(meta.pending_count, 1);
        assert_eq!(meta.event_count, 0);
    }
}
