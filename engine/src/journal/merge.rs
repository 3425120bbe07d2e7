//! Merging observed changes into pending state.
//!
//! | incoming \ current | absent            | committed        | pending                          |
//! |--------------------|-------------------|------------------|----------------------------------|
//! | Created/Modified   | insert `Created`  | insert `Modified`| update in place (delete → modify)|
//! | Deleted            | nothing           | insert `Deleted` | drop / turn into a delete        |
//! | Renamed            | placeholder/error | insert `Renamed` | move the pending row             |
//!
//! Deleting a folder also discards the pending rows beneath it. A rename
//! that was moved into the folder turns into a delete of its origin, since
//! the remote side still knows the item there.

use super::batch::{pending_row, Cascade, Plan, Planned, PreviousFallback, Primary};
use super::resolve::{self, anchor, Slot};
use super::JournalTx;
use crate::storage::{JournalRow, RowFilter, Storage, Transaction};
use crate::{error::Result, ChangeKind, ChangeRecord, Error, RowId};
use std::collections::BTreeSet;

impl<'j, S: Storage + 'j> JournalTx<'j, S> {
    pub(super) fn plan_merge(
        &mut self,
        record: &ChangeRecord,
        fallback: PreviousFallback,
    ) -> Result<Planned> {
        match record.kind {
            ChangeKind::Created | ChangeKind::Modified => self.merge_upsert(record),
            ChangeKind::Deleted => self.merge_delete(record),
            ChangeKind::Renamed => self.merge_rename(record, fallback),
        }
    }

    fn merge_upsert(&mut self, record: &ChangeRecord) -> Result<Planned> {
        let path = &record.new_path;
        let Some(slot) = self.slot(path)? else {
            return Ok(Planned::missing_parent(record, path));
        };

        if let Some(pending) = &slot.pending {
            tracing::debug!(path = %path, row_id = pending.row_id, "updating pending row");
            let mut row = pending.clone();
            row.is_folder = record.is_folder();
            return Ok(Planned::Ready(Plan::new(Primary::Update(row))));
        }
        if let Some(deleted) = &slot.deleted {
            tracing::debug!(path = %path, row_id = deleted.row_id, "pending delete becomes a modification");
            let mut row = deleted.clone();
            row.kind = ChangeKind::Modified;
            row.is_folder = record.is_folder();
            return Ok(Planned::Ready(Plan::new(Primary::Update(row))));
        }
        if let Some(committed) = &slot.committed {
            let mut row = pending_row(record, &slot, &committed.name, ChangeKind::Modified, Some(committed));
            row.is_folder = record.is_folder();
            return Ok(Planned::Ready(Plan::new(Primary::Insert(row))));
        }

        let name = path
            .name()
            .ok_or_else(|| Error::InvalidArgument("empty path".into()))?;
        let row = pending_row(record, &slot, name, ChangeKind::Created, None);
        Ok(Planned::Ready(Plan::new(Primary::Insert(row))))
    }

    fn merge_delete(&mut self, record: &ChangeRecord) -> Result<Planned> {
        let path = &record.new_path;
        let current = self
            .slot(path)?
            .and_then(|slot| slot.visible().cloned().map(|row| (slot, row)));
        let Some((slot, current)) = current else {
            return Ok(Planned::Blocked {
                needs: path.clone(),
                error: None,
            });
        };

        if !current.pending {
            let row = pending_row(record, &slot, &current.name, ChangeKind::Deleted, Some(&current));
            let cascade = self.discard_beneath(&current)?;
            return Ok(Planned::Ready(Plan::new(Primary::Insert(row)).with_cascade(cascade)));
        }

        let origin = match (current.kind, current.previous_row_id) {
            (ChangeKind::Renamed, Some(previous)) => Some(resolve::required_row(&mut self.tx, previous)?),
            _ => None,
        };
        match (current.kind, origin) {
            (ChangeKind::Modified, _) => {
                tracing::debug!(path = %path, row_id = current.row_id, "pending modification becomes a delete");
                let cascade = self.discard_beneath(&current)?;
                let mut row = current;
                row.kind = ChangeKind::Deleted;
                Ok(Planned::Ready(Plan::new(Primary::Update(row)).with_cascade(cascade)))
            }
            (ChangeKind::Renamed, Some(origin)) => {
                tracing::debug!(path = %path, row_id = current.row_id, "pending rename becomes a delete of its origin");
                let cascade = self.discard_beneath(&current)?;
                let mut row = current;
                row.kind = ChangeKind::Deleted;
                row.name = origin.name;
                row.parent_row_id = origin.parent_row_id;
                Ok(Planned::Ready(Plan::new(Primary::Update(row)).with_cascade(cascade)))
            }
            (ChangeKind::Deleted, _) => Err(Error::invariant(format!(
                "pending delete {} is visible at {path}",
                current.row_id
            ))),
            // Never synced: the item simply disappears
            _ => {
                tracing::debug!(path = %path, row_id = current.row_id, "dropping unsynced item");
                let cascade = self.purge(&current)?;
                Ok(Planned::Ready(Plan::new(Primary::Delete(current.row_id)).with_cascade(cascade)))
            }
        }
    }

    fn merge_rename(
        &mut self,
        record: &ChangeRecord,
        fallback: PreviousFallback,
    ) -> Result<Planned> {
        let new = &record.new_path;
        let Some(old) = record.old_path.as_ref() else {
            return Err(Error::InvalidArgument(format!("rename to {new} has no source")));
        };
        let name = new
            .name()
            .ok_or_else(|| Error::InvalidArgument("empty path".into()))?;
        let Some(new_slot) = self.slot(new)? else {
            return Ok(Planned::missing_parent(record, new));
        };
        let same_slot = old.eq_with(new, self.ctx.case);
        if !same_slot && new_slot.visible().is_some() {
            return Err(Error::AlreadyExists(new.to_string()));
        }

        let old_slot = self.slot(old)?;
        let Some(source) = old_slot.as_ref().and_then(Slot::visible).cloned() else {
            return self.plan_placeholder(record, old, old_slot, &new_slot, fallback);
        };

        if !source.pending {
            let row = pending_row(record, &new_slot, name, ChangeKind::Renamed, Some(&source));
            return Ok(Planned::Ready(Plan::new(Primary::Insert(row))));
        }

        let new_parent = anchor(&new_slot.parent);
        let mut row = source.clone();
        row.name = name.to_string();
        row.parent_row_id = Some(new_parent);

        let origin = match (source.kind, source.previous_row_id) {
            (ChangeKind::Renamed, Some(previous)) => Some(resolve::required_row(&mut self.tx, previous)?),
            _ => None,
        };
        match (source.kind, origin) {
            (ChangeKind::Modified, _) => {
                row.kind = ChangeKind::Renamed;
                Ok(Planned::Ready(Plan::new(Primary::Update(row))))
            }
            (ChangeKind::Renamed, Some(origin)) => {
                if origin.parent_row_id == Some(new_parent) && origin.name == name {
                    tracing::debug!(path = %new, row_id = row.row_id, "rename returned to its origin");
                    row.kind = ChangeKind::Modified;
                }
                Ok(Planned::Ready(Plan::new(Primary::Update(row))))
            }
            (ChangeKind::Deleted, _) => Err(Error::invariant(format!(
                "pending delete {} is visible at {old}",
                source.row_id
            ))),
            _ => match new_slot.deleted.as_ref().filter(|_| !same_slot) {
                // An unsynced item moved onto a deleted one: the remote side
                // sees a modification of the deleted item.
                Some(deleted) => {
                    tracing::debug!(path = %new, "rename over a pending delete becomes a modification");
                    let (keep_id, drop_id) = if source.row_id < deleted.row_id {
                        (source.row_id, deleted.row_id)
                    } else {
                        (deleted.row_id, source.row_id)
                    };
                    let keep = JournalRow {
                        row_id: keep_id,
                        kind: ChangeKind::Modified,
                        previous_row_id: deleted.previous_row_id,
                        server_uid_id: deleted.server_uid_id,
                        is_folder: record.is_folder(),
                        ..row
                    };
                    Ok(Planned::Ready(Plan::new(Primary::DeleteAndUpdate {
                        delete: drop_id,
                        keep,
                    })))
                }
                None => Ok(Planned::Ready(Plan::new(Primary::Update(row)))),
            },
        }
    }

    /// Pending rows below a folder that is about to be deleted.
    fn discard_beneath(&mut self, row: &JournalRow) -> Result<Vec<Cascade>> {
        if !row.is_folder {
            return Ok(Vec::new());
        }
        let subtree = resolve::subtree_rows(&mut self.tx, row)?;
        let inside: BTreeSet<RowId> = subtree.iter().map(|r| r.row_id).collect();

        let mut cascade = Vec::new();
        for pending in subtree.into_iter().filter(|r| r.pending) {
            match self.moved_in_origin(&pending, &inside)? {
                Some(origin) => cascade.push(Cascade::Update(delete_at_origin(pending, origin))),
                None => cascade.push(Cascade::Delete(pending.row_id)),
            }
        }
        Ok(cascade)
    }

    /// Everything stored for an item that never reached the remote side.
    fn purge(&mut self, row: &JournalRow) -> Result<Vec<Cascade>> {
        let subtree = resolve::subtree_rows(&mut self.tx, row)?;
        let mut removed: BTreeSet<RowId> = subtree.iter().map(|r| r.row_id).collect();
        removed.insert(row.row_id);

        let mut cascade = Vec::new();
        let mut dropped = Vec::new();
        for child in subtree {
            match self.moved_in_origin(&child, &removed)? {
                Some(origin) => {
                    removed.remove(&child.row_id);
                    cascade.push(Cascade::Update(delete_at_origin(child, origin)));
                }
                None => dropped.push(child.row_id),
            }
        }
        cascade.extend(dropped.into_iter().map(Cascade::Delete));
        cascade.extend(self.orphaned_copies(&removed)?);
        Ok(cascade)
    }

    /// Origin of a pending rename that moved in from outside `inside`.
    fn moved_in_origin(
        &mut self,
        row: &JournalRow,
        inside: &BTreeSet<RowId>,
    ) -> Result<Option<JournalRow>> {
        match (row.pending, row.kind, row.previous_row_id) {
            (true, ChangeKind::Renamed, Some(previous)) if !inside.contains(&previous) => {
                resolve::required_row(&mut self.tx, previous).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Rows outside `removed` that supersede a row inside it. They no longer
    /// have anything to supersede: deletes go away, the rest become creations.
    pub(super) fn orphaned_copies(&mut self, removed: &BTreeSet<RowId>) -> Result<Vec<Cascade>> {
        let mut cascade = Vec::new();
        for &id in removed {
            for row in self.tx.select_rows(&RowFilter::new().previous(id))? {
                if removed.contains(&row.row_id) {
                    continue;
                }
                if row.kind == ChangeKind::Deleted {
                    cascade.push(Cascade::Delete(row.row_id));
                } else {
                    cascade.push(Cascade::Update(JournalRow {
                        kind: ChangeKind::Created,
                        previous_row_id: None,
                        server_uid_id: None,
                        ..row
                    }));
                }
            }
        }
        Ok(cascade)
    }
}

fn delete_at_origin(row: JournalRow, origin: JournalRow) -> JournalRow {
    JournalRow {
        kind: ChangeKind::Deleted,
        name: origin.name,
        parent_row_id: origin.parent_row_id,
        ..row
    }
}
