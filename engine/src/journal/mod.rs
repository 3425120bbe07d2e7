//! Change journal.
//!
//! The [`Journal`] persists [`ChangeRecord`]s through a [`Storage`] backend
//! and keeps an in-memory [`PathTrie`] index of the current state (committed
//! items plus pending changes). Every mutating call runs inside one storage
//! transaction; the index is only touched after that transaction commits,
//! and the notifications produced while updating it are returned in an
//! [`Outcome`] for the caller to dispatch.
//!
//! ## Row model
//!
//! A logical item is represented by at most one committed row and at most
//! one pending row. A pending `Modified`, `Deleted` or `Renamed` row names
//! the committed row it supersedes in `previous_row_id`; a pending `Created`
//! row supersedes nothing. Completion folds the pending row into the
//! committed state (see `complete.rs`).

mod batch;
mod complete;
mod identity;
mod merge;
mod resolve;
mod scan;
mod shared;

pub use batch::PreviousFallback;
pub use scan::SnapshotEntry;
pub use shared::SharedJournal;

use crate::storage::{JournalRow, NewJournalRow, RowFilter, ServerUidRow, Storage, SyncPoint, Transaction};
use crate::trie::PathTrie;
use crate::{error::Result, ChangeKind, ChangeRecord, Error, EventId, FsPath, PathCase, RowId, ServerUidId};
use resolve::Ctx;
use serde::{Deserialize, Serialize};

/// Journal configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalOptions {
    /// How path segments are compared
    pub case: PathCase,
    /// What to do with a rename whose source is unknown
    pub placeholders: PreviousFallback,
}

/// What the index knows about a visible path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub row_id: RowId,
    pub event_id: Option<EventId>,
    pub kind: ChangeKind,
    pub pending: bool,
    pub is_folder: bool,
}

impl From<&JournalRow> for IndexEntry {
    fn from(row: &JournalRow) -> Self {
        Self {
            row_id: row.row_id,
            event_id: row.event_id,
            kind: row.kind,
            pending: row.pending,
            is_folder: row.is_folder,
        }
    }
}

/// Something observers of the journal should hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A pending change was recorded at `path`
    Changed {
        path: FsPath,
        kind: ChangeKind,
        pending: bool,
    },
    /// `path` left the index
    Removed { path: FsPath },
    /// `from` now lives at `to`
    Moved { from: FsPath, to: FsPath },
    /// The remote service confirmed the change at `path`
    Synced { path: FsPath, kind: ChangeKind },
    /// The remote service confirmed a rename
    SyncedRename { from: FsPath, to: FsPath },
    /// The remote service confirmed a deletion
    SyncedDelete { path: FsPath },
}

/// Result of a mutating journal call.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    /// To be dispatched by the caller, in order
    pub notifications: Vec<Notification>,
}

/// Index change staged until the storage transaction commits.
#[derive(Debug, Clone)]
enum IndexOp {
    /// Store and announce a pending change
    Upsert(FsPath, IndexEntry),
    /// Store without announcing
    Refresh(FsPath, IndexEntry),
    Remove(FsPath),
    Rename(FsPath, FsPath),
    Notify(Notification),
}

fn apply_index_ops(index: &mut PathTrie<IndexEntry>, ops: Vec<IndexOp>) -> Vec<Notification> {
    let mut notifications = Vec::new();
    for op in ops {
        match op {
            IndexOp::Upsert(path, entry) => {
                let kind = entry.kind;
                let pending = entry.pending;
                match index.set(&path, Some(entry)) {
                    Ok(_) => notifications.push(Notification::Changed {
                        path,
                        kind,
                        pending,
                    }),
                    Err(err) => tracing::warn!(path = %path, error = %err, "index update failed"),
                }
            }
            IndexOp::Refresh(path, entry) => {
                if let Err(err) = index.set(&path, Some(entry)) {
                    tracing::warn!(path = %path, error = %err, "index refresh failed");
                }
            }
            IndexOp::Remove(path) => match index.remove(&path) {
                Ok(removed) => notifications.extend(
                    removed
                        .into_iter()
                        .map(|r| Notification::Removed { path: r.path }),
                ),
                Err(err) => tracing::warn!(path = %path, error = %err, "index removal failed"),
            },
            IndexOp::Rename(from, to) => {
                if index.count_under(&from) == 0 {
                    continue;
                }
                match index.rename(&from, &to) {
                    Ok(moved) => notifications.extend(
                        moved
                            .into_iter()
                            .map(|m| Notification::Moved { from: m.from, to: m.to }),
                    ),
                    Err(err) => {
                        tracing::warn!(from = %from, to = %to, error = %err, "index rename failed")
                    }
                }
            }
            IndexOp::Notify(notification) => notifications.push(notification),
        }
    }
    notifications
}

/// The change journal for one sync root.
#[derive(Debug)]
pub struct Journal<S: Storage> {
    storage: S,
    ctx: Ctx,
    options: JournalOptions,
    index: PathTrie<IndexEntry>,
}

impl<S: Storage> Journal<S> {
    /// Open the journal stored in `storage`, creating the root row if needed,
    /// and load the index.
    pub fn open(mut storage: S, root_path: FsPath, options: JournalOptions) -> Result<Self> {
        if root_path.is_root() {
            return Err(Error::InvalidArgument("journal root path is empty".into()));
        }

        let root_row = {
            let mut tx = storage.begin()?;
            let roots: Vec<JournalRow> = tx
                .select_rows(&RowFilter::new())?
                .into_iter()
                .filter(JournalRow::is_root)
                .collect();
            let root_row = match roots.as_slice() {
                [] => {
                    let name = root_path.name().unwrap_or_default().to_string();
                    let ids = tx.insert_rows(vec![NewJournalRow {
                        event_id: None,
                        name,
                        parent_row_id: None,
                        previous_row_id: None,
                        server_uid_id: None,
                        pending: false,
                        event_order: None,
                        kind: ChangeKind::Created,
                        is_folder: true,
                    }])?;
                    ids.first()
                        .copied()
                        .ok_or_else(|| Error::Storage("root row insert returned no id".into()))?
                }
                [root] => root.row_id,
                _ => {
                    return Err(Error::invariant(format!(
                        "expected one root row, found {}",
                        roots.len()
                    )))
                }
            };
            tx.commit()?;
            root_row
        };

        let mut journal = Self {
            storage,
            ctx: Ctx {
                root_row,
                root_path: root_path.clone(),
                case: options.case,
            },
            options,
            index: PathTrie::with_root(root_path, options.case),
        };
        journal.rebuild_index()?;
        tracing::info!(
            root = %journal.ctx.root_path,
            entries = journal.index.count(),
            "journal opened"
        );
        Ok(journal)
    }

    pub fn root_path(&self) -> &FsPath {
        &self.ctx.root_path
    }

    pub fn options(&self) -> JournalOptions {
        self.options
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// The in-memory index of visible paths.
    pub fn index(&self) -> &PathTrie<IndexEntry> {
        &self.index
    }

    /// Index entry at `path`.
    pub fn lookup(&self, path: &FsPath) -> Option<&IndexEntry> {
        self.index.get(path)
    }

    /// Start a transaction that can span several operations.
    pub fn transaction(&mut self) -> Result<JournalTx<'_, S>> {
        let tx = self.storage.begin()?;
        Ok(JournalTx {
            tx,
            ctx: &self.ctx,
            options: self.options,
            index: &mut self.index,
            ops: Vec::new(),
        })
    }

    /// Rebuild the index from storage.
    pub fn rebuild_index(&mut self) -> Result<()> {
        let mut index = PathTrie::with_root(self.ctx.root_path.clone(), self.ctx.case);
        let mut tx = self.storage.begin()?;
        let root = resolve::required_row(&mut tx, self.ctx.root_row)?;
        let mut stack = vec![(root, self.ctx.root_path.clone())];
        while let Some((row, path)) = stack.pop() {
            for child in resolve::visible_children(&mut tx, &self.ctx, &row)? {
                let child_path = path.join(&child.name)?;
                index.set(&child_path, Some(IndexEntry::from(&child)))?;
                stack.push((child, child_path));
            }
        }
        tx.commit()?;
        self.index = index;
        Ok(())
    }

    /// Record changes as given, failing on conflicts with pending state.
    pub fn add_events(&mut self, records: Vec<ChangeRecord>) -> Result<Outcome<Vec<ChangeRecord>>> {
        let fallback = self.options.placeholders;
        self.add_events_with(records, fallback)
    }

    /// [`Journal::add_events`] with an explicit rename fallback.
    pub fn add_events_with(
        &mut self,
        records: Vec<ChangeRecord>,
        fallback: PreviousFallback,
    ) -> Result<Outcome<Vec<ChangeRecord>>> {
        let mut tx = self.transaction()?;
        let value = tx.add_events(records, fallback)?;
        tx.commit().map(|notifications| Outcome { value, notifications })
    }

    /// Reconcile changes with what is already journaled.
    pub fn merge(&mut self, records: Vec<ChangeRecord>) -> Result<Outcome<Vec<ChangeRecord>>> {
        let mut tx = self.transaction()?;
        let value = tx.merge(records)?;
        tx.commit().map(|notifications| Outcome { value, notifications })
    }

    /// Mark a pending event as confirmed by the remote service.
    pub fn mark_completed(&mut self, event_id: EventId) -> Result<Outcome<()>> {
        let mut tx = self.transaction()?;
        tx.mark_completed(event_id)?;
        tx.commit().map(|notifications| Outcome {
            value: (),
            notifications,
        })
    }

    /// Attach a remote identity to the row holding `event_id`.
    pub fn set_remote_identity(
        &mut self,
        event_id: EventId,
        server_uid: &str,
        revision: Option<String>,
    ) -> Result<Outcome<ServerUidId>> {
        let mut tx = self.transaction()?;
        let value = tx.set_remote_identity(event_id, server_uid, revision)?;
        tx.commit().map(|notifications| Outcome { value, notifications })
    }

    /// Complete every confirmed event and store the sync point.
    pub fn record_sync_point(
        &mut self,
        remote_sync_id: &str,
        confirmed_event_ids: &[EventId],
        root_identity: Option<&str>,
    ) -> Result<Outcome<SyncPoint>> {
        let mut tx = self.transaction()?;
        let value = tx.record_sync_point(remote_sync_id, confirmed_event_ids, root_identity)?;
        tx.commit().map(|notifications| Outcome { value, notifications })
    }

    /// Feed a traversal snapshot in as `Created` changes.
    pub fn index_snapshot(&mut self, entries: Vec<SnapshotEntry>) -> Result<Outcome<Vec<ChangeRecord>>> {
        let mut tx = self.transaction()?;
        let value = tx.index_snapshot(entries)?;
        tx.commit().map(|notifications| Outcome { value, notifications })
    }

    pub fn latest_sync_point(&mut self) -> Result<Option<SyncPoint>> {
        self.read(|tx| tx.latest_sync_point())
    }

    /// The change recorded under `event_id`.
    pub fn get_by_event_id(&mut self, event_id: EventId) -> Result<ChangeRecord> {
        self.read(|tx| tx.get_by_event_id(event_id))
    }

    /// Most recent changes, newest first.
    pub fn recent_changes(&mut self, limit: usize) -> Result<Vec<ChangeRecord>> {
        self.read(|tx| tx.recent_changes(limit))
    }

    /// Pending changes in dependency order.
    pub fn pending_changes(&mut self) -> Result<Vec<ChangeRecord>> {
        self.read(|tx| tx.pending_changes())
    }

    /// Current path of the item known remotely as `server_uid`.
    pub fn get_path_for_remote_identity(&mut self, server_uid: &str) -> Result<Option<FsPath>> {
        self.read(|tx| tx.get_path_for_remote_identity(server_uid))
    }

    /// Identity row for `id`, following retired keys.
    pub fn server_uid(&mut self, id: ServerUidId) -> Result<Option<ServerUidRow>> {
        self.read(|tx| tx.server_uid(id))
    }

    fn read<T>(&mut self, f: impl FnOnce(&mut JournalTx<'_, S>) -> Result<T>) -> Result<T> {
        let mut tx = self.transaction()?;
        let value = f(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// A journal transaction. Nothing is visible outside until
/// [`JournalTx::commit`]; dropping it rolls everything back.
pub struct JournalTx<'j, S: Storage + 'j> {
    tx: S::Tx<'j>,
    ctx: &'j Ctx,
    options: JournalOptions,
    index: &'j mut PathTrie<IndexEntry>,
    ops: Vec<IndexOp>,
}

impl<'j, S: Storage + 'j> JournalTx<'j, S> {
    /// Commit storage, then update the index and return the notifications.
    pub fn commit(self) -> Result<Vec<Notification>> {
        let JournalTx { tx, index, ops, .. } = self;
        tx.commit()?;
        Ok(apply_index_ops(index, ops))
    }

    /// Discard every change made through this transaction.
    pub fn rollback(self) -> Result<()> {
        self.tx.rollback()
    }

    pub fn latest_sync_point(&mut self) -> Result<Option<SyncPoint>> {
        self.tx.latest_sync_point()
    }

    pub fn get_by_event_id(&mut self, event_id: EventId) -> Result<ChangeRecord> {
        self.tx
            .event(event_id)?
            .map(|event| event.record)
            .ok_or_else(|| Error::NotFound(format!("event {event_id}")))
    }

    pub fn recent_changes(&mut self, limit: usize) -> Result<Vec<ChangeRecord>> {
        Ok(self
            .tx
            .recent_events(limit)?
            .into_iter()
            .map(|event| event.record)
            .collect())
    }

    /// Pending rows described as changes, parents before their children.
    pub fn pending_changes(&mut self) -> Result<Vec<ChangeRecord>> {
        let mut rows = self.tx.select_rows(&RowFilter::new().pending(true))?;
        rows.sort_by_key(|row| (row.event_order, row.row_id));

        let mut emitted: std::collections::BTreeSet<RowId> = Default::default();
        let pending_ids: std::collections::BTreeSet<RowId> = rows.iter().map(|r| r.row_id).collect();
        let mut ordered = Vec::with_capacity(rows.len());
        while !rows.is_empty() {
            let ready = rows.iter().position(|row| {
                row.parent_row_id
                    .map_or(true, |p| !pending_ids.contains(&p) || emitted.contains(&p))
            });
            // A cycle cannot be ordered; fall back to event order.
            let row = rows.remove(ready.unwrap_or(0));
            emitted.insert(row.row_id);
            ordered.push(row);
        }

        let mut changes = Vec::with_capacity(ordered.len());
        for row in ordered {
            if let Some(change) = self.describe(&row)? {
                changes.push(change);
            }
        }
        Ok(changes)
    }

    pub fn get_path_for_remote_identity(&mut self, server_uid: &str) -> Result<Option<FsPath>> {
        let Some(uid) = self.tx.find_server_uid(server_uid)? else {
            return Ok(None);
        };
        let rows = self
            .tx
            .select_rows(&RowFilter::new().server_uid_id(uid.server_uid_id))?;

        // Prefer the row that is visible right now.
        let (pending, committed): (Vec<_>, Vec<_>) = rows.into_iter().partition(|r| r.pending);
        for row in pending.iter().filter(|r| r.kind != ChangeKind::Deleted) {
            if let Some(path) = resolve::path_of(&mut self.tx, self.ctx, row)? {
                return Ok(Some(path));
            }
        }
        for row in committed {
            let superseding = resolve::superseding(&mut self.tx, row.row_id)?;
            if superseding.iter().any(|p| p.kind == ChangeKind::Deleted) {
                continue;
            }
            let current = superseding.into_iter().next().unwrap_or(row);
            if let Some(path) = resolve::path_of(&mut self.tx, self.ctx, &current)? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// Describe a pending row as the change it currently stands for.
    fn describe(&mut self, row: &JournalRow) -> Result<Option<ChangeRecord>> {
        let event = match row.event_id {
            Some(id) => self.tx.event(id)?,
            None => None,
        };
        let Some(event) = event else {
            return Ok(None);
        };
        let Some(new_path) = resolve::path_of(&mut self.tx, self.ctx, row)? else {
            tracing::trace!(row_id = row.row_id, "pending row below a deleted folder");
            return Ok(None);
        };
        let old_path = match (row.kind, row.previous_row_id) {
            (ChangeKind::Renamed, Some(previous)) => {
                let previous = resolve::required_row(&mut self.tx, previous)?;
                resolve::path_of(&mut self.tx, self.ctx, &previous)?
            }
            _ => None,
        };

        let mut change = event.record;
        change.kind = row.kind;
        change.new_path = new_path;
        change.old_path = old_path;
        change.journal_id = Some(row.row_id);
        change.event_id = row.event_id;
        if let Some(metadata) = change.metadata.as_mut() {
            metadata.is_folder = row.is_folder;
        }
        Ok(Some(change))
    }

    /// Row that currently holds `event_id`.
    fn row_for_event(&mut self, event_id: EventId) -> Result<JournalRow> {
        let mut rows = self.tx.select_rows(&RowFilter::new().event_id(event_id))?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            0 if self.tx.event(event_id)?.is_none() => {
                Err(Error::NotFound(format!("event {event_id}")))
            }
            0 => Err(Error::InvalidState(format!(
                "event {event_id} has been superseded by a later change"
            ))),
            n => Err(Error::invariant(format!(
                "event {event_id} is held by {n} rows"
            ))),
        }
    }

    /// Stage an index update for `path` from its current storage state.
    fn stage_refresh(&mut self, path: &FsPath, announce: bool) -> Result<()> {
        match resolve::resolve(&mut self.tx, self.ctx, path)? {
            Some(row) => {
                let entry = IndexEntry::from(&row);
                self.ops.push(if announce {
                    IndexOp::Upsert(path.clone(), entry)
                } else {
                    IndexOp::Refresh(path.clone(), entry)
                });
            }
            None => self.ops.push(IndexOp::Remove(path.clone())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntryMetadata, MemoryStorage};
    use std::collections::BTreeMap;

    fn p(s: &str) -> FsPath {
        FsPath::parse(s).unwrap()
    }

    fn journal() -> Journal<MemoryStorage> {
        Journal::open(MemoryStorage::new(), p("root"), JournalOptions::default()).unwrap()
    }

    fn index_state(journal: &Journal<MemoryStorage>) -> BTreeMap<String, (ChangeKind, bool)> {
        journal
            .index()
            .iter()
            .map(|(path, entry)| (path.to_string(), (entry.kind, entry.pending)))
            .collect()
    }

    #[test]
    fn open_creates_a_single_root_row() {
        let journal = journal();
        assert_eq!(journal.storage().row_count(), 1);
        assert!(journal.index().is_empty());

        let storage = journal.into_storage();
        let reopened = Journal::open(storage, p("root"), JournalOptions::default()).unwrap();
        assert_eq!(reopened.storage().row_count(), 1);
    }

    #[test]
    fn open_rejects_empty_root() {
        assert!(matches!(
            Journal::open(MemoryStorage::new(), FsPath::root(), JournalOptions::default()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn add_events_updates_index_after_commit() {
        let mut journal = journal();
        let outcome = journal
            .add_events(vec![
                ChangeRecord::created(p("root/a"), EntryMetadata::folder()),
                ChangeRecord::created(p("root/a/f.txt"), EntryMetadata::file(5)),
            ])
            .unwrap();

        assert_eq!(outcome.value.len(), 2);
        assert!(outcome.value.iter().all(|r| r.event_id.is_some() && r.journal_id.is_some()));
        assert_eq!(
            outcome.notifications,
            vec![
                Notification::Changed {
                    path: p("root/a"),
                    kind: ChangeKind::Created,
                    pending: true
                },
                Notification::Changed {
                    path: p("root/a/f.txt"),
                    kind: ChangeKind::Created,
                    pending: true
                },
            ]
        );
        assert!(journal.lookup(&p("root/A/F.TXT")).unwrap().pending);
    }

    #[test]
    fn dropped_transaction_leaves_no_trace() {
        let mut journal = journal();
        {
            let mut tx = journal.transaction().unwrap();
            tx.add_events(
                vec![ChangeRecord::created(p("root/a"), EntryMetadata::folder())],
                PreviousFallback::Fail,
            )
            .unwrap();
        }
        assert_eq!(journal.storage().row_count(), 1);
        assert!(journal.index().is_empty());
        assert!(journal.recent_changes(10).unwrap().is_empty());
    }

    #[test]
    fn failed_call_rolls_back_the_whole_batch() {
        let mut journal = journal();
        let err = journal
            .add_events(vec![
                ChangeRecord::created(p("root/a"), EntryMetadata::folder()),
                ChangeRecord::created(p("root/missing/f"), EntryMetadata::file(1)),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::MissingParent { .. }));
        assert_eq!(journal.storage().row_count(), 1);
        assert!(journal.index().is_empty());
    }

    #[test]
    fn index_matches_a_rebuild() {
        let mut journal = journal();
        journal
            .add_events(vec![
                ChangeRecord::created(p("root/a"), EntryMetadata::folder()),
                ChangeRecord::created(p("root/a/x"), EntryMetadata::file(1)),
                ChangeRecord::created(p("root/b"), EntryMetadata::folder()),
            ])
            .unwrap();
        journal
            .merge(vec![
                ChangeRecord::renamed(p("root/a"), p("root/b/a2"), EntryMetadata::folder()),
                ChangeRecord::modified(p("root/b/a2/x"), EntryMetadata::file(2)),
            ])
            .unwrap();

        let incremental = index_state(&journal);
        journal.rebuild_index().unwrap();
        assert_eq!(incremental, index_state(&journal));
        assert!(incremental.contains_key("root/b/a2/x"));
    }

    #[test]
    fn notification_serde_is_tagged() {
        let json = serde_json::to_value(Notification::SyncedRename {
            from: p("root/a"),
            to: p("root/b"),
        })
        .unwrap();
        assert_eq!(json["type"], "synced_rename");
        assert_eq!(json["from"], "root/a");
    }
}
