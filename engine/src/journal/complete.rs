//! Completion: folding a confirmed pending row into committed state.
//!
//! - `Created` just flips to committed.
//! - `Modified` absorbs the row it superseded: children move over, the old
//!   row is deleted.
//! - `Renamed` absorbs its origin the same way, then evicts any committed
//!   row already sitting at the destination. Everything pointing at the
//!   loser is moved onto the winner.
//! - `Deleted` removes itself, the superseded row and everything beneath it.
//!   Items renamed out of the folder before the delete keep their children.

use super::batch::Cascade;
use super::resolve::{self, aliases};
use super::{IndexOp, JournalTx, Notification};
use crate::storage::{JournalRow, RowFilter, Storage, Transaction};
use crate::{error::Result, ChangeKind, Error, EventId, FsPath, RowId};
use std::collections::BTreeSet;

impl<'j, S: Storage + 'j> JournalTx<'j, S> {
    /// Mark the pending change recorded under `event_id` as confirmed.
    pub fn mark_completed(&mut self, event_id: EventId) -> Result<()> {
        let row = self.row_for_event(event_id)?;
        self.complete_row(row)?;
        tracing::info!(event_id, "change completed");
        Ok(())
    }

    pub(super) fn complete_row(&mut self, row: JournalRow) -> Result<()> {
        if !row.pending {
            return Err(Error::InvalidState(format!(
                "row {} is not pending",
                row.row_id
            )));
        }
        if !row.is_root() {
            self.require_identity(&row)?;
        }

        let path = resolve::path_of(&mut self.tx, self.ctx, &row)?;
        let previous = match row.previous_row_id {
            Some(id) => Some(resolve::required_row(&mut self.tx, id)?),
            None => None,
        };
        let old_path = match (row.kind, &previous) {
            (ChangeKind::Renamed, Some(previous)) => {
                resolve::path_of(&mut self.tx, self.ctx, previous)?
            }
            _ => None,
        };

        let kind = row.kind;
        let parent = row.parent_row_id;
        let name = row.name.clone();
        let row_id = row.row_id;
        match kind {
            ChangeKind::Created => self.complete_created(row)?,
            ChangeKind::Modified => {
                self.absorb(row, previous)?;
            }
            ChangeKind::Renamed => {
                let winner = self.absorb(row, previous)?;
                self.evict_losers(&winner)?;
            }
            ChangeKind::Deleted => self.complete_deleted(row, previous)?,
        }

        let Some(path) = path else {
            tracing::warn!(row_id, "completed row has no visible path");
            return Ok(());
        };
        if kind != ChangeKind::Deleted {
            self.stage_refresh(&path, false)?;
        }
        if let Some(parent) = parent {
            if self.slot_has_other_pending(parent, &name, row_id)? {
                tracing::warn!(path = %path, "newer pending change supersedes completed state");
                return Ok(());
            }
        }
        let notification = match (kind, old_path) {
            (ChangeKind::Deleted, _) => Notification::SyncedDelete { path },
            (ChangeKind::Renamed, Some(from)) => Notification::SyncedRename { from, to: path },
            _ => Notification::Synced { path, kind },
        };
        self.ops.push(IndexOp::Notify(notification));
        Ok(())
    }

    fn require_identity(&mut self, row: &JournalRow) -> Result<()> {
        let uid = match row.server_uid_id {
            Some(id) => self.server_uid(id)?,
            None => None,
        };
        if uid.and_then(|u| u.server_uid).is_none() {
            return Err(Error::InvalidState(format!(
                "row {} has no remote identity",
                row.row_id
            )));
        }
        Ok(())
    }

    fn complete_created(&mut self, mut row: JournalRow) -> Result<()> {
        let Some(parent_id) = row.parent_row_id else {
            return Err(Error::invariant(format!("created row {} has no parent", row.row_id)));
        };
        let parent = resolve::required_row(&mut self.tx, parent_id)?;
        let slot = resolve::slot_in(&mut self.tx, self.ctx, &parent, &row.name)?;
        if let Some(existing) = slot.committed {
            return Err(Error::invariant(format!(
                "row {} cannot be committed: row {} already holds '{}'",
                row.row_id, existing.row_id, row.name
            )));
        }
        row.pending = false;
        self.tx.update_row(&row)
    }

    /// Commit `row`, folding its superseded row into it.
    fn absorb(&mut self, mut row: JournalRow, previous: Option<JournalRow>) -> Result<JournalRow> {
        if let Some(previous) = previous {
            if row.server_uid_id.is_none() {
                row.server_uid_id = previous.server_uid_id;
            }
            self.retire(previous.row_id, row.row_id)?;
        }
        row.previous_row_id = None;
        row.pending = false;
        self.tx.update_row(&row)?;
        Ok(row)
    }

    /// Committed rows that share the winner's slot after a rename.
    fn evict_losers(&mut self, winner: &JournalRow) -> Result<()> {
        let Some(parent_id) = winner.parent_row_id else {
            return Ok(());
        };
        let parent = resolve::required_row(&mut self.tx, parent_id)?;
        let rows = self.tx.select_rows(
            &RowFilter::new()
                .parent_in(aliases(&parent))
                .named(winner.name.clone(), self.ctx.case)
                .pending(false),
        )?;
        for loser in rows.into_iter().filter(|r| r.row_id != winner.row_id) {
            let moved_away = resolve::superseding(&mut self.tx, loser.row_id)?
                .iter()
                .any(|p| p.kind == ChangeKind::Renamed);
            if moved_away {
                continue;
            }
            tracing::warn!(
                winner = winner.row_id,
                loser = loser.row_id,
                name = %winner.name,
                "rename collided with a committed row; merging"
            );
            self.retire(loser.row_id, winner.row_id)?;
            self.stage_visible_subtree(winner)?;
        }
        Ok(())
    }

    /// Delete `loser`, moving its children and dependants onto `winner`.
    fn retire(&mut self, loser: RowId, winner: RowId) -> Result<()> {
        self.repoint_children(loser, winner)?;
        for mut dependant in self.tx.select_rows(&RowFilter::new().previous(loser))? {
            if dependant.row_id == winner {
                continue;
            }
            if dependant.kind == ChangeKind::Deleted {
                self.tx.delete_rows(&[dependant.row_id])?;
            } else {
                dependant.previous_row_id = Some(winner);
                self.tx.update_row(&dependant)?;
            }
        }
        self.tx.delete_rows(&[loser])
    }

    fn complete_deleted(&mut self, row: JournalRow, previous: Option<JournalRow>) -> Result<()> {
        let mut removed = BTreeSet::from([row.row_id]);
        let mut rescued = Vec::new();
        if let Some(previous) = &previous {
            removed.insert(previous.row_id);
            let mut frontier = aliases(previous);
            while let Some(id) = frontier.pop() {
                for child in self.tx.select_rows(&RowFilter::new().parent_in(vec![id]))? {
                    if !removed.insert(child.row_id) {
                        continue;
                    }
                    if let Some(target) = self.moved_out(&child)? {
                        rescued.push((child.row_id, target));
                        continue;
                    }
                    frontier.push(child.row_id);
                }
            }
        }

        for (from, to) in rescued {
            self.repoint_children(from, to)?;
        }
        let cascade = self.orphaned_copies(&removed)?;
        self.tx.delete_rows(&removed.into_iter().collect::<Vec<_>>())?;
        for change in cascade {
            match change {
                Cascade::Delete(id) => self.tx.delete_rows(&[id])?,
                Cascade::Update(orphan) => {
                    self.tx.update_row(&orphan)?;
                    if let Some(path) = resolve::path_of(&mut self.tx, self.ctx, &orphan)? {
                        self.stage_refresh(&path, false)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Pending rename that took a committed row out of a deleted folder.
    fn moved_out(&mut self, row: &JournalRow) -> Result<Option<RowId>> {
        if row.pending {
            return Ok(None);
        }
        for rename in resolve::superseding(&mut self.tx, row.row_id)? {
            if rename.kind == ChangeKind::Renamed
                && resolve::path_of(&mut self.tx, self.ctx, &rename)?.is_some()
            {
                return Ok(Some(rename.row_id));
            }
        }
        Ok(None)
    }

    fn slot_has_other_pending(&mut self, parent: RowId, name: &str, except: RowId) -> Result<bool> {
        let Some(parent) = self.tx.row(parent)? else {
            return Ok(false);
        };
        Ok(self
            .tx
            .select_rows(
                &RowFilter::new()
                    .parent_in(aliases(&parent))
                    .named(name, self.ctx.case)
                    .pending(true),
            )?
            .iter()
            .any(|r| r.row_id != except))
    }

    /// Refresh index entries below `row` after its children changed.
    fn stage_visible_subtree(&mut self, row: &JournalRow) -> Result<()> {
        let Some(path) = resolve::path_of(&mut self.tx, self.ctx, row)? else {
            return Ok(());
        };
        let mut stack: Vec<(JournalRow, FsPath)> = vec![(row.clone(), path)];
        while let Some((row, path)) = stack.pop() {
            for child in resolve::visible_children(&mut self.tx, self.ctx, &row)? {
                let child_path = path.join(&child.name)?;
                self.stage_refresh(&child_path, false)?;
                stack.push((child, child_path));
            }
        }
        Ok(())
    }
}
