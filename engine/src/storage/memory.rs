//! In-memory transactional storage.
//!
//! Tables are ordered maps so iteration (and snapshot export) is
//! deterministic. A transaction mutates the tables in place and keeps an
//! undo log; rollback replays the log backwards.

use super::{
    EventRow, JournalRow, NewEvent, NewJournalRow, RowFilter, ServerUidRow, Storage, SyncPoint,
    Transaction,
};
use crate::{
    error::Result, snapshot::JournalSnapshot, CorrelationId, Error, EventId, EventOrder, RowId,
    ServerUidId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier counters. Each holds the last value handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub event_id: EventId,
    pub row_id: RowId,
    pub server_uid_id: ServerUidId,
    pub event_order: EventOrder,
    pub correlation: CorrelationId,
    pub sync_point: u64,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    events: BTreeMap<EventId, EventRow>,
    rows: BTreeMap<RowId, JournalRow>,
    /// parent row -> child rows
    children: BTreeMap<RowId, BTreeSet<RowId>>,
    server_uids: BTreeMap<ServerUidId, ServerUidRow>,
    forwarding: BTreeMap<ServerUidId, ServerUidId>,
    sync_points: BTreeMap<u64, SyncPoint>,
    counters: Counters,
}

impl Tables {
    fn put_row(&mut self, row: JournalRow) -> Option<JournalRow> {
        let previous = self.take_row(row.row_id);
        if let Some(parent) = row.parent_row_id {
            self.children.entry(parent).or_default().insert(row.row_id);
        }
        self.rows.insert(row.row_id, row);
        previous
    }

    fn take_row(&mut self, row_id: RowId) -> Option<JournalRow> {
        let row = self.rows.remove(&row_id)?;
        if let Some(parent) = row.parent_row_id {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.remove(&row_id);
                if siblings.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
        Some(row)
    }

    fn restore_row(&mut self, row_id: RowId, row: Option<JournalRow>) {
        match row {
            Some(row) => {
                self.put_row(row);
            }
            None => {
                self.take_row(row_id);
            }
        }
    }
}

fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: Option<V>) {
    match value {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

/// One reversible change.
#[derive(Debug)]
enum Undo {
    Event(EventId, Option<EventRow>),
    Row(RowId, Option<JournalRow>),
    ServerUid(ServerUidId, Option<ServerUidRow>),
    Forwarding(ServerUidId, Option<ServerUidId>),
    SyncPoint(u64, Option<SyncPoint>),
    Counters(Counters),
}

/// Ordered, transactional storage held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Tables,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of journal rows, including the root.
    pub fn row_count(&self) -> usize {
        self.tables.rows.len()
    }

    /// Number of recorded events.
    pub fn event_count(&self) -> usize {
        self.tables.events.len()
    }

    /// All journal rows ordered by identifier.
    pub fn rows(&self) -> impl Iterator<Item = &JournalRow> {
        self.tables.rows.values()
    }

    /// Export every table.
    pub fn export(&self) -> JournalSnapshot {
        let mut snapshot = JournalSnapshot::new();
        snapshot.events = self.tables.events.values().cloned().collect();
        snapshot.rows = self.tables.rows.values().cloned().collect();
        snapshot.server_uids = self.tables.server_uids.values().cloned().collect();
        snapshot.forwarding = self.tables.forwarding.clone();
        snapshot.sync_points = self.tables.sync_points.values().cloned().collect();
        snapshot.counters = self.tables.counters;
        snapshot
    }

    /// Rebuild storage from a snapshot.
    pub fn import(snapshot: JournalSnapshot) -> Result<Self> {
        snapshot.validate()?;
        let mut tables = Tables {
            counters: snapshot.counters,
            forwarding: snapshot.forwarding,
            ..Tables::default()
        };
        for event in snapshot.events {
            tables.events.insert(event.event_id, event);
        }
        for row in snapshot.rows {
            tables.put_row(row);
        }
        for uid in snapshot.server_uids {
            tables.server_uids.insert(uid.server_uid_id, uid);
        }
        for point in snapshot.sync_points {
            tables.sync_points.insert(point.sync_point_id, point);
        }
        Ok(Self { tables })
    }
}

impl Storage for MemoryStorage {
    type Tx<'a> = MemoryTx<'a>;

    fn begin(&mut self) -> Result<MemoryTx<'_>> {
        Ok(MemoryTx {
            tables: &mut self.tables,
            undo: Vec::new(),
            finished: false,
        })
    }
}

/// Transaction over [`MemoryStorage`].
#[derive(Debug)]
pub struct MemoryTx<'a> {
    tables: &'a mut Tables,
    undo: Vec<Undo>,
    finished: bool,
}

impl MemoryTx<'_> {
    fn bump_counters(&mut self, bump: impl FnOnce(&mut Counters) -> u64) -> u64 {
        self.undo.push(Undo::Counters(self.tables.counters));
        bump(&mut self.tables.counters)
    }

    fn undo_all(&mut self) {
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Event(id, event) => restore(&mut self.tables.events, id, event),
                Undo::Row(id, row) => self.tables.restore_row(id, row),
                Undo::ServerUid(id, uid) => restore(&mut self.tables.server_uids, id, uid),
                Undo::Forwarding(id, to) => restore(&mut self.tables.forwarding, id, to),
                Undo::SyncPoint(id, point) => restore(&mut self.tables.sync_points, id, point),
                Undo::Counters(counters) => self.tables.counters = counters,
            }
        }
    }
}

impl Transaction for MemoryTx<'_> {
    fn insert_events(&mut self, events: Vec<NewEvent>) -> Result<Vec<EventId>> {
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let event_id = self.bump_counters(|c| {
                c.event_id += 1;
                c.event_id
            });
            let mut record = event.record;
            record.event_id = Some(event_id);
            record.correlation = Some(event.correlation);
            let row = EventRow {
                event_id,
                record,
                correlation: event.correlation,
                correlation_index: event.correlation_index,
            };
            let previous = self.tables.events.insert(event_id, row);
            self.undo.push(Undo::Event(event_id, previous));
            ids.push(event_id);
        }
        Ok(ids)
    }

    fn event(&mut self, event_id: EventId) -> Result<Option<EventRow>> {
        Ok(self.tables.events.get(&event_id).cloned())
    }

    fn update_event(&mut self, event: &EventRow) -> Result<()> {
        let Some(slot) = self.tables.events.get_mut(&event.event_id) else {
            return Err(Error::Storage(format!("event {} does not exist", event.event_id)));
        };
        let previous = std::mem::replace(slot, event.clone());
        self.undo.push(Undo::Event(event.event_id, Some(previous)));
        Ok(())
    }

    fn events_by_correlation(&mut self, correlation: CorrelationId) -> Result<Vec<EventRow>> {
        let mut events: Vec<EventRow> = self
            .tables
            .events
            .values()
            .filter(|e| e.correlation == correlation)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.correlation_index);
        Ok(events)
    }

    fn recent_events(&mut self, limit: usize) -> Result<Vec<EventRow>> {
        Ok(self
            .tables
            .events
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn insert_rows(&mut self, rows: Vec<NewJournalRow>) -> Result<Vec<RowId>> {
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(parent) = row.parent_row_id {
                if !self.tables.rows.contains_key(&parent) {
                    return Err(Error::Storage(format!(
                        "row '{}' references missing parent {parent}",
                        row.name
                    )));
                }
            }
            let row_id = self.bump_counters(|c| {
                c.row_id += 1;
                c.row_id
            });
            let previous = self.tables.put_row(row.with_id(row_id));
            self.undo.push(Undo::Row(row_id, previous));
            ids.push(row_id);
        }
        Ok(ids)
    }

    fn update_row(&mut self, row: &JournalRow) -> Result<()> {
        if !self.tables.rows.contains_key(&row.row_id) {
            return Err(Error::Storage(format!("row {} does not exist", row.row_id)));
        }
        let previous = self.tables.put_row(row.clone());
        self.undo.push(Undo::Row(row.row_id, previous));
        Ok(())
    }

    fn delete_rows(&mut self, row_ids: &[RowId]) -> Result<()> {
        for &row_id in row_ids {
            if let Some(previous) = self.tables.take_row(row_id) {
                self.undo.push(Undo::Row(row_id, Some(previous)));
            }
        }
        Ok(())
    }

    fn row(&mut self, row_id: RowId) -> Result<Option<JournalRow>> {
        Ok(self.tables.rows.get(&row_id).cloned())
    }

    fn select_rows(&mut self, filter: &RowFilter) -> Result<Vec<JournalRow>> {
        let mut rows: Vec<JournalRow> = match &filter.parent_in {
            Some(parents) => {
                let mut ids = BTreeSet::new();
                for parent in parents {
                    if let Some(children) = self.tables.children.get(parent) {
                        ids.extend(children.iter().copied());
                    }
                }
                ids.into_iter()
                    .filter_map(|id| self.tables.rows.get(&id))
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            }
            None => self
                .tables
                .rows
                .values()
                .filter(|row| filter.matches(row))
                .cloned()
                .collect(),
        };
        rows.sort_by_key(|row| row.row_id);
        Ok(rows)
    }

    fn insert_server_uid(
        &mut self,
        server_uid: Option<String>,
        revision: Option<String>,
    ) -> Result<ServerUidId> {
        let id = self.bump_counters(|c| {
            c.server_uid_id += 1;
            c.server_uid_id
        });
        let previous = self.tables.server_uids.insert(
            id,
            ServerUidRow {
                server_uid_id: id,
                server_uid,
                revision,
            },
        );
        self.undo.push(Undo::ServerUid(id, previous));
        Ok(id)
    }

    fn server_uid(&mut self, id: ServerUidId) -> Result<Option<ServerUidRow>> {
        Ok(self.tables.server_uids.get(&id).cloned())
    }

    fn find_server_uid(&mut self, server_uid: &str) -> Result<Option<ServerUidRow>> {
        Ok(self
            .tables
            .server_uids
            .values()
            .find(|row| row.server_uid.as_deref() == Some(server_uid))
            .cloned())
    }

    fn update_server_uid(&mut self, row: &ServerUidRow) -> Result<()> {
        let Some(slot) = self.tables.server_uids.get_mut(&row.server_uid_id) else {
            return Err(Error::Storage(format!(
                "server uid {} does not exist",
                row.server_uid_id
            )));
        };
        let previous = std::mem::replace(slot, row.clone());
        self.undo
            .push(Undo::ServerUid(row.server_uid_id, Some(previous)));
        Ok(())
    }

    fn delete_server_uid(&mut self, id: ServerUidId) -> Result<()> {
        if let Some(previous) = self.tables.server_uids.remove(&id) {
            self.undo.push(Undo::ServerUid(id, Some(previous)));
        }
        Ok(())
    }

    fn forwarding(&mut self, id: ServerUidId) -> Result<Option<ServerUidId>> {
        Ok(self.tables.forwarding.get(&id).copied())
    }

    fn set_forwarding(&mut self, from: ServerUidId, to: ServerUidId) -> Result<()> {
        let previous = self.tables.forwarding.insert(from, to);
        self.undo.push(Undo::Forwarding(from, previous));
        Ok(())
    }

    fn forwarded_to(&mut self, to: ServerUidId) -> Result<Vec<ServerUidId>> {
        Ok(self
            .tables
            .forwarding
            .iter()
            .filter(|(_, target)| **target == to)
            .map(|(from, _)| *from)
            .collect())
    }

    fn next_event_order(&mut self) -> Result<EventOrder> {
        Ok(self.bump_counters(|c| {
            c.event_order += 1;
            c.event_order
        }))
    }

    fn next_correlation(&mut self) -> Result<CorrelationId> {
        Ok(self.bump_counters(|c| {
            c.correlation += 1;
            c.correlation
        }))
    }

    fn insert_sync_point(
        &mut self,
        remote_sync_id: String,
        confirmed_event_ids: Vec<EventId>,
        root_identity: Option<String>,
    ) -> Result<SyncPoint> {
        let id = self.bump_counters(|c| {
            c.sync_point += 1;
            c.sync_point
        });
        let point = SyncPoint {
            sync_point_id: id,
            remote_sync_id,
            confirmed_event_ids,
            root_identity,
        };
        let previous = self.tables.sync_points.insert(id, point.clone());
        self.undo.push(Undo::SyncPoint(id, previous));
        Ok(point)
    }

    fn latest_sync_point(&mut self) -> Result<Option<SyncPoint>> {
        Ok(self.tables.sync_points.values().next_back().cloned())
    }

    fn commit(mut self) -> Result<()> {
        self.undo.clear();
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self) -> Result<()> {
        self.undo_all();
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.undo_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChangeKind, ChangeRecord, EntryMetadata, FsPath, PathCase};

    fn folder_row(name: &str, parent: Option<RowId>) -> NewJournalRow {
        NewJournalRow {
            event_id: None,
            name: name.to_string(),
            parent_row_id: parent,
            previous_row_id: None,
            server_uid_id: None,
            pending: false,
            event_order: None,
            kind: ChangeKind::Created,
            is_folder: true,
        }
    }

    #[test]
    fn commit_keeps_writes() {
        let mut storage = MemoryStorage::new();
        let mut tx = storage.begin().unwrap();
        let ids = tx
            .insert_rows(vec![folder_row("root", None)])
            .unwrap();
        tx.insert_rows(vec![folder_row("a", Some(ids[0]))]).unwrap();
        tx.commit().unwrap();

        assert_eq!(storage.row_count(), 2);
        let mut tx = storage.begin().unwrap();
        let children = tx
            .select_rows(&RowFilter::new().parent_in(vec![ids[0]]))
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "a");
    }

    #[test]
    fn drop_rolls_back_rows_and_counters() {
        let mut storage = MemoryStorage::new();
        {
            let mut tx = storage.begin().unwrap();
            tx.insert_rows(vec![folder_row("root", None)]).unwrap();
            tx.commit().unwrap();
        }
        {
            let mut tx = storage.begin().unwrap();
            let mut root = tx.row(1).unwrap().unwrap();
            root.name = "renamed".into();
            tx.update_row(&root).unwrap();
            tx.insert_rows(vec![folder_row("a", Some(1))]).unwrap();
            tx.next_event_order().unwrap();
            tx.insert_server_uid(Some("uid".into()), None).unwrap();
            // dropped here without commit
        }

        assert_eq!(storage.row_count(), 1);
        let mut tx = storage.begin().unwrap();
        assert_eq!(tx.row(1).unwrap().unwrap().name, "root");
        assert!(tx.select_rows(&RowFilter::new().parent_in(vec![1])).unwrap().is_empty());
        assert_eq!(tx.next_event_order().unwrap(), 1);
        assert!(tx.find_server_uid("uid").unwrap().is_none());
        // The next row id is reused after rollback
        assert_eq!(tx.insert_rows(vec![folder_row("b", Some(1))]).unwrap(), vec![2]);
    }

    #[test]
    fn explicit_rollback_restores_deleted_rows() {
        let mut storage = MemoryStorage::new();
        let mut tx = storage.begin().unwrap();
        let ids = tx.insert_rows(vec![folder_row("root", None)]).unwrap();
        tx.insert_rows(vec![folder_row("a", Some(ids[0]))]).unwrap();
        tx.commit().unwrap();

        let mut tx = storage.begin().unwrap();
        tx.delete_rows(&[2]).unwrap();
        assert!(tx.row(2).unwrap().is_none());
        tx.rollback().unwrap();

        let mut tx = storage.begin().unwrap();
        let found = tx
            .select_rows(&RowFilter::new().parent_in(vec![1]).named("A", PathCase::Insensitive))
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn events_map_back_through_correlation() {
        let mut storage = MemoryStorage::new();
        let mut tx = storage.begin().unwrap();
        let correlation = tx.next_correlation().unwrap();
        let records = ["root/b", "root/a"].map(|p| {
            ChangeRecord::created(FsPath::parse(p).unwrap(), EntryMetadata::file(1))
        });
        let ids = tx
            .insert_events(
                records
                    .iter()
                    .enumerate()
                    .map(|(i, record)| NewEvent {
                        record: record.clone(),
                        correlation,
                        correlation_index: i as u32,
                    })
                    .collect(),
            )
            .unwrap();

        let events = tx.events_by_correlation(correlation).unwrap();
        assert_eq!(events.iter().map(|e| e.event_id).collect::<Vec<_>>(), ids);
        assert_eq!(events[0].record.new_path.to_string(), "root/b");
        assert_eq!(events[0].record.event_id, Some(ids[0]));

        let recent = tx.recent_events(1).unwrap();
        assert_eq!(recent[0].event_id, ids[1]);
    }

    #[test]
    fn export_import_preserves_tables() {
        let mut storage = MemoryStorage::new();
        let mut tx = storage.begin().unwrap();
        let ids = tx.insert_rows(vec![folder_row("root", None)]).unwrap();
        tx.insert_rows(vec![folder_row("a", Some(ids[0]))]).unwrap();
        let uid = tx.insert_server_uid(Some("remote-1".into()), None).unwrap();
        tx.set_forwarding(uid + 10, uid).unwrap();
        tx.insert_sync_point("sync-1".into(), vec![], None).unwrap();
        tx.commit().unwrap();

        let mut restored = MemoryStorage::import(storage.export()).unwrap();
        assert_eq!(restored.row_count(), 2);
        let mut tx = restored.begin().unwrap();
        assert_eq!(tx.forwarding(uid + 10).unwrap(), Some(uid));
        assert_eq!(tx.latest_sync_point().unwrap().unwrap().remote_sync_id, "sync-1");
        assert_eq!(tx.select_rows(&RowFilter::new().parent_in(vec![1])).unwrap().len(), 1);
        // Counters continue where the export left off
        assert_eq!(tx.insert_rows(vec![folder_row("b", Some(1))]).unwrap(), vec![3]);
    }
}
