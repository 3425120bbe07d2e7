//! Visibility rules: which journal row represents a path right now.
//!
//! A slot (parent + name) can hold several rows at once: the committed row,
//! a pending row superseding it, a pending delete, or a pending rename that
//! moved another item in. The rules, applied level by level from the root:
//!
//! - a pending row that is not a delete wins,
//! - otherwise a pending delete makes the item absent,
//! - otherwise the committed row, unless a pending rename moved it elsewhere.
//!
//! Children of a pending `Modified`/`Renamed` row keep pointing at the
//! committed row it supersedes, so both rows are searched when descending.

use crate::storage::{JournalRow, RowFilter, Transaction};
use crate::{error::Result, ChangeKind, Error, FsPath, PathCase, RowId};
use std::collections::{BTreeMap, BTreeSet};

/// Fixed facts about the journal a transaction works against.
#[derive(Debug, Clone)]
pub(crate) struct Ctx {
    pub root_row: RowId,
    pub root_path: FsPath,
    pub case: PathCase,
}

impl Ctx {
    /// Segments of `path` below the journal root.
    pub fn relative<'p>(&self, path: &'p FsPath) -> Result<Vec<&'p str>> {
        if !path.starts_with(&self.root_path, self.case) {
            return Err(Error::InvalidArgument(format!(
                "{path} is outside the journal root {}",
                self.root_path
            )));
        }
        Ok(path.segments().skip(self.root_path.depth()).collect())
    }

    /// Reject paths that are not strictly below the root.
    pub fn check_inside(&self, path: &FsPath) -> Result<()> {
        if self.relative(path)?.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "{path} is the journal root itself"
            )));
        }
        Ok(())
    }
}

/// Rows whose children belong to `row`.
pub(crate) fn aliases(row: &JournalRow) -> Vec<RowId> {
    match superseded_base(row) {
        Some(base) => vec![row.row_id, base],
        None => vec![row.row_id],
    }
}

/// Row new children of `row` should point at.
pub(crate) fn anchor(row: &JournalRow) -> RowId {
    superseded_base(row).unwrap_or(row.row_id)
}

fn superseded_base(row: &JournalRow) -> Option<RowId> {
    match row.kind {
        ChangeKind::Modified | ChangeKind::Renamed if row.pending => row.previous_row_id,
        _ => None,
    }
}

/// Everything stored under one parent + name.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub parent: JournalRow,
    /// Pending row standing for the item (never a delete)
    pub pending: Option<JournalRow>,
    /// Pending delete in this slot
    pub deleted: Option<JournalRow>,
    /// Committed row not moved away by a pending rename
    pub committed: Option<JournalRow>,
}

impl Slot {
    /// The row representing the item, if the item exists.
    pub fn visible(&self) -> Option<&JournalRow> {
        if let Some(pending) = &self.pending {
            return Some(pending);
        }
        if self.deleted.is_some() {
            return None;
        }
        self.committed.as_ref()
    }
}

pub(crate) fn required_row<T: Transaction>(tx: &mut T, row_id: RowId) -> Result<JournalRow> {
    tx.row(row_id)?
        .ok_or_else(|| Error::invariant(format!("row {row_id} does not exist")))
}

/// Pending rows that supersede the committed row `row_id`.
pub(crate) fn superseding<T: Transaction>(tx: &mut T, row_id: RowId) -> Result<Vec<JournalRow>> {
    tx.select_rows(&RowFilter::new().previous(row_id).pending(true))
}

/// Collect the slot `name` under `parent`.
pub(crate) fn slot_in<T: Transaction>(
    tx: &mut T,
    ctx: &Ctx,
    parent: &JournalRow,
    name: &str,
) -> Result<Slot> {
    let rows = tx.select_rows(
        &RowFilter::new()
            .parent_in(aliases(parent))
            .named(name, ctx.case),
    )?;
    let in_slot: BTreeSet<RowId> = rows.iter().map(|r| r.row_id).collect();

    let mut slot = Slot {
        parent: parent.clone(),
        pending: None,
        deleted: None,
        committed: None,
    };
    for row in rows {
        if row.pending {
            let target = if row.kind == ChangeKind::Deleted {
                &mut slot.deleted
            } else {
                &mut slot.pending
            };
            if let Some(existing) = target {
                return Err(Error::invariant(format!(
                    "rows {} and {} are both pending for '{name}' under row {}",
                    existing.row_id, row.row_id, parent.row_id
                )));
            }
            *target = Some(row);
            continue;
        }

        let moved_away = superseding(tx, row.row_id)?
            .iter()
            .any(|p| p.kind == ChangeKind::Renamed && !in_slot.contains(&p.row_id));
        if moved_away {
            continue;
        }
        if let Some(existing) = &slot.committed {
            return Err(Error::invariant(format!(
                "rows {} and {} are both committed for '{name}' under row {}",
                existing.row_id, row.row_id, parent.row_id
            )));
        }
        slot.committed = Some(row);
    }
    Ok(slot)
}

/// Row currently representing `path`.
pub(crate) fn resolve<T: Transaction>(
    tx: &mut T,
    ctx: &Ctx,
    path: &FsPath,
) -> Result<Option<JournalRow>> {
    let segments = ctx.relative(path)?;
    let mut current = required_row(tx, ctx.root_row)?;
    for segment in segments {
        let slot = slot_in(tx, ctx, &current, segment)?;
        match slot.visible() {
            Some(row) => current = row.clone(),
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Slot of `path`, or `None` when its parent does not exist.
pub(crate) fn slot<T: Transaction>(tx: &mut T, ctx: &Ctx, path: &FsPath) -> Result<Option<Slot>> {
    ctx.check_inside(path)?;
    let (Some(parent_path), Some(name)) = (path.parent(), path.name()) else {
        return Err(Error::InvalidArgument("empty path".into()));
    };
    match resolve(tx, ctx, &parent_path)? {
        Some(parent) => slot_in(tx, ctx, &parent, name).map(Some),
        None => Ok(None),
    }
}

/// Visible children of `row`, keyed by case-folded name.
pub(crate) fn visible_children<T: Transaction>(
    tx: &mut T,
    ctx: &Ctx,
    row: &JournalRow,
) -> Result<Vec<JournalRow>> {
    let mut names: BTreeMap<String, String> = BTreeMap::new();
    for child in tx.select_rows(&RowFilter::new().parent_in(aliases(row)))? {
        names
            .entry(ctx.case.fold(&child.name).into_owned())
            .or_insert(child.name);
    }

    let mut children = Vec::with_capacity(names.len());
    for name in names.values() {
        if let Some(child) = slot_in(tx, ctx, row, name)?.visible() {
            children.push(child.clone());
        }
    }
    Ok(children)
}

/// The row that stands for `row` when walking down from the root, or
/// `None` when the item is pending deletion.
fn representative<T: Transaction>(tx: &mut T, row: JournalRow) -> Result<Option<JournalRow>> {
    if row.pending {
        return Ok((row.kind != ChangeKind::Deleted).then_some(row));
    }
    let mut superseding = superseding(tx, row.row_id)?;
    if superseding.iter().any(|p| p.kind == ChangeKind::Deleted) {
        return Ok(None);
    }
    Ok(Some(superseding.pop().unwrap_or(row)))
}

/// Current path of `row`: its own name under the visible path of its
/// ancestors. `None` when an ancestor is pending deletion.
pub(crate) fn path_of<T: Transaction>(
    tx: &mut T,
    ctx: &Ctx,
    row: &JournalRow,
) -> Result<Option<FsPath>> {
    if row.row_id == ctx.root_row {
        return Ok(Some(ctx.root_path.clone()));
    }

    let mut names = vec![row.name.clone()];
    let mut parent_id = row.parent_row_id;
    loop {
        let Some(id) = parent_id else {
            return Err(Error::invariant(format!(
                "row {} is not connected to the root",
                row.row_id
            )));
        };
        if id == ctx.root_row {
            break;
        }
        let parent = required_row(tx, id)?;
        let Some(parent) = representative(tx, parent)? else {
            return Ok(None);
        };
        if names.len() > 4096 {
            return Err(Error::invariant(format!(
                "parent chain of row {} does not terminate",
                row.row_id
            )));
        }
        names.push(parent.name);
        parent_id = parent.parent_row_id;
    }

    let mut path = ctx.root_path.clone();
    for name in names.iter().rev() {
        path = path.join(name)?;
    }
    Ok(Some(path))
}

/// Every row stored beneath `row`, visible or not.
pub(crate) fn subtree_rows<T: Transaction>(tx: &mut T, row: &JournalRow) -> Result<Vec<JournalRow>> {
    let mut out = Vec::new();
    let mut seen: BTreeSet<RowId> = aliases(row).into_iter().collect();
    let mut frontier: Vec<RowId> = seen.iter().copied().collect();
    while !frontier.is_empty() {
        let children = tx.select_rows(&RowFilter::new().parent_in(std::mem::take(&mut frontier)))?;
        for child in children {
            if seen.insert(child.row_id) {
                frontier.push(child.row_id);
                out.push(child);
            }
        }
    }
    Ok(out)
}
