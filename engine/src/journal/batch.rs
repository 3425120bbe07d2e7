//! Dependency-ordered batch execution.
//!
//! Records are processed in passes. Within a pass every record is planned
//! against the state left by the previous pass, so a record whose parent or
//! rename source is produced by another record of the same call is deferred
//! to a later pass. Records touching a path that an earlier record of the
//! same pass already touched (the path itself, an ancestor or a descendant)
//! are held back too, which keeps the caller's order for overlapping changes.
//! A pass that makes no progress fails with the first dependency error.
//!
//! Each pass is flushed in one go: events first (one correlation id for the
//! whole pass), then deletes, then inserts, then updates.

use super::resolve::{self, anchor, Slot};
use super::{IndexOp, JournalTx};
use crate::storage::{JournalRow, NewEvent, NewJournalRow, RowFilter, Storage, Transaction};
use crate::{
    error::Result, ChangeKind, ChangeRecord, Direction, Error, FsPath, PathCase, RowId,
};
use serde::{Deserialize, Serialize};

/// What to do with a rename whose source item is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreviousFallback {
    /// Fail with `MissingPrevious`
    #[default]
    Fail,
    /// Synthesize a committed placeholder row for the source path
    Placeholder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Mode {
    /// Record changes as given
    Append,
    /// Reconcile changes with what is already journaled
    Merge,
}

/// Main storage effect of one record.
#[derive(Debug, Clone)]
pub(super) enum Primary {
    NoOp,
    Insert(NewJournalRow),
    Update(JournalRow),
    Delete(RowId),
    /// Two rows collapse into `keep`; children of `delete` move over to it
    DeleteAndUpdate { delete: RowId, keep: JournalRow },
}

impl Primary {
    fn name(&self) -> &'static str {
        match self {
            Primary::NoOp => "noop",
            Primary::Insert(_) => "insert",
            Primary::Update(_) => "update",
            Primary::Delete(_) => "delete",
            Primary::DeleteAndUpdate { .. } => "delete_and_update",
        }
    }
}

/// Side effect on a row other than the record's own.
#[derive(Debug, Clone)]
pub(super) enum Cascade {
    Update(JournalRow),
    Delete(RowId),
}

#[derive(Debug, Clone)]
pub(super) struct Plan {
    pub primary: Primary,
    /// Committed stand-in for an unknown rename source; becomes the
    /// inserted row's previous row
    pub placeholder: Option<NewJournalRow>,
    pub cascade: Vec<Cascade>,
}

impl Plan {
    pub fn new(primary: Primary) -> Self {
        Self {
            primary,
            placeholder: None,
            cascade: Vec::new(),
        }
    }

    pub fn with_cascade(mut self, cascade: Vec<Cascade>) -> Self {
        self.cascade = cascade;
        self
    }
}

pub(super) enum Planned {
    Ready(Plan),
    /// `needs` must exist first. If nothing else in the batch produces it,
    /// `error` is raised; `None` means the record has nothing left to do.
    Blocked {
        needs: FsPath,
        error: Option<Error>,
    },
}

impl Planned {
    pub fn missing_parent(record: &ChangeRecord, path: &FsPath) -> Self {
        Planned::Blocked {
            needs: path.parent().unwrap_or_default(),
            error: Some(Error::MissingParent {
                path: path.clone(),
                event: record.event_id,
            }),
        }
    }

    pub fn missing_previous(record: &ChangeRecord, path: &FsPath) -> Self {
        Planned::Blocked {
            needs: path.clone(),
            error: Some(Error::MissingPrevious {
                path: path.clone(),
                event: record.event_id,
            }),
        }
    }
}

/// A fresh pending row for `record` in `slot`.
pub(super) fn pending_row(
    record: &ChangeRecord,
    slot: &Slot,
    name: &str,
    kind: ChangeKind,
    previous: Option<&JournalRow>,
) -> NewJournalRow {
    NewJournalRow {
        event_id: None,
        name: name.to_string(),
        parent_row_id: Some(anchor(&slot.parent)),
        previous_row_id: previous.map(|p| p.row_id),
        server_uid_id: previous.and_then(|p| p.server_uid_id),
        pending: true,
        event_order: None,
        kind,
        is_folder: previous.map_or_else(|| record.is_folder(), |p| p.is_folder),
    }
}

fn leaf_name(path: &FsPath) -> Result<&str> {
    path.name()
        .ok_or_else(|| Error::InvalidArgument("empty path".into()))
}

/// Index of a record within its correlation batch.
fn position_in_pass(k: usize) -> Result<u32> {
    u32::try_from(k)
        .map_err(|_| Error::InvalidArgument(format!("batch holds more than {} records", u32::MAX)))
}

fn overlaps(a: &FsPath, b: &FsPath, case: PathCase) -> bool {
    a.starts_with(b, case) || b.starts_with(a, case)
}

fn touched_paths(record: &ChangeRecord) -> impl Iterator<Item = &FsPath> {
    std::iter::once(&record.new_path).chain(record.old_path.iter())
}

impl<'j, S: Storage + 'j> JournalTx<'j, S> {
    /// Record changes as given, failing on conflicts with pending state.
    pub fn add_events(
        &mut self,
        records: Vec<ChangeRecord>,
        fallback: PreviousFallback,
    ) -> Result<Vec<ChangeRecord>> {
        self.run_batch(records, Mode::Append, fallback)
    }

    /// Reconcile changes with what is already journaled.
    pub fn merge(&mut self, records: Vec<ChangeRecord>) -> Result<Vec<ChangeRecord>> {
        let fallback = self.options.placeholders;
        self.run_batch(records, Mode::Merge, fallback)
    }

    pub(super) fn slot(&mut self, path: &FsPath) -> Result<Option<Slot>> {
        resolve::slot(&mut self.tx, self.ctx, path)
    }

    pub(super) fn run_batch(
        &mut self,
        mut records: Vec<ChangeRecord>,
        mode: Mode,
        fallback: PreviousFallback,
    ) -> Result<Vec<ChangeRecord>> {
        for record in &mut records {
            record.validate()?;
            for path in touched_paths(record) {
                self.ctx.check_inside(path)?;
            }
            if let Some(old) = &record.old_path {
                if record.new_path.depth() > old.depth()
                    && record.new_path.starts_with(old, self.ctx.case)
                {
                    return Err(Error::InvalidArgument(format!(
                        "cannot move {old} into itself ({})",
                        record.new_path
                    )));
                }
            }
            record.event_id = None;
            record.journal_id = None;
            record.correlation = None;
        }

        let case = self.ctx.case;
        let mut remaining: Vec<usize> = (0..records.len()).collect();
        let mut pass = 0u32;
        while !remaining.is_empty() {
            pass += 1;
            let mut busy: Vec<FsPath> = Vec::new();
            let mut ready: Vec<(usize, Plan)> = Vec::new();
            let mut deferred = Vec::new();
            let mut first_blocked: Option<Error> = None;

            for &i in &remaining {
                let record = &records[i];
                if touched_paths(record).any(|path| busy.iter().any(|b| overlaps(b, path, case))) {
                    deferred.push(i);
                    continue;
                }

                let planned = match mode {
                    Mode::Append => self.plan_append(record, fallback)?,
                    Mode::Merge => self.plan_merge(record, fallback)?,
                };
                match planned {
                    Planned::Ready(plan) => {
                        busy.extend(touched_paths(record).cloned());
                        ready.push((i, plan));
                    }
                    Planned::Blocked { needs, error } => {
                        if produced_elsewhere(&records, &remaining, i, &needs, mode, case) {
                            tracing::trace!(
                                pass,
                                path = %record.new_path,
                                needs = %needs,
                                "deferring change"
                            );
                            first_blocked.get_or_insert_with(|| {
                                error.unwrap_or_else(|| Error::NotFound(needs.to_string()))
                            });
                            deferred.push(i);
                        } else if let Some(error) = error {
                            return Err(error);
                        } else {
                            busy.extend(touched_paths(record).cloned());
                            ready.push((i, Plan::new(Primary::NoOp)));
                        }
                    }
                }
            }

            if ready.is_empty() {
                return Err(first_blocked.unwrap_or_else(|| {
                    Error::invariant("batch pass made no progress")
                }));
            }
            self.flush(&mut records, ready)?;
            remaining = deferred;
        }
        Ok(records)
    }

    /// Plan a raw insertion.
    fn plan_append(
        &mut self,
        record: &ChangeRecord,
        fallback: PreviousFallback,
    ) -> Result<Planned> {
        let path = &record.new_path;
        let name = leaf_name(path)?;
        match record.kind {
            ChangeKind::Created => {
                let Some(slot) = self.slot(path)? else {
                    return Ok(Planned::missing_parent(record, path));
                };
                if slot.visible().is_some() || slot.pending.is_some() || slot.deleted.is_some() {
                    return Err(Error::AlreadyExists(path.to_string()));
                }
                let row = pending_row(record, &slot, name, ChangeKind::Created, None);
                Ok(Planned::Ready(Plan::new(Primary::Insert(row))))
            }
            ChangeKind::Modified | ChangeKind::Deleted => {
                let current = self.slot(path)?.and_then(|slot| {
                    slot.visible().cloned().map(|row| (slot, row))
                });
                let Some((slot, current)) = current else {
                    return Ok(Planned::Blocked {
                        needs: path.clone(),
                        error: Some(Error::NotFound(path.to_string())),
                    });
                };
                if current.pending {
                    return Err(Error::AlreadyExists(format!(
                        "{path} already has a pending change"
                    )));
                }
                let row = pending_row(record, &slot, &current.name, record.kind, Some(&current));
                Ok(Planned::Ready(Plan::new(Primary::Insert(row))))
            }
            ChangeKind::Renamed => {
                let Some(old) = record.old_path.as_ref() else {
                    return Err(Error::InvalidArgument(format!("rename to {path} has no source")));
                };
                let Some(new_slot) = self.slot(path)? else {
                    return Ok(Planned::missing_parent(record, path));
                };
                let same_slot = old.eq_with(path, self.ctx.case);
                if !same_slot && new_slot.visible().is_some() {
                    return Err(Error::AlreadyExists(path.to_string()));
                }

                let old_slot = self.slot(old)?;
                match old_slot.as_ref().and_then(Slot::visible) {
                    Some(source) if source.pending => Err(Error::AlreadyExists(format!(
                        "{old} already has a pending change"
                    ))),
                    Some(source) => {
                        let source = source.clone();
                        let row = pending_row(record, &new_slot, name, ChangeKind::Renamed, Some(&source));
                        Ok(Planned::Ready(Plan::new(Primary::Insert(row))))
                    }
                    None => self.plan_placeholder(record, old, old_slot, &new_slot, fallback),
                }
            }
        }
    }

    /// Plan a rename whose source is unknown.
    pub(super) fn plan_placeholder(
        &mut self,
        record: &ChangeRecord,
        old: &FsPath,
        old_slot: Option<Slot>,
        new_slot: &Slot,
        fallback: PreviousFallback,
    ) -> Result<Planned> {
        if fallback == PreviousFallback::Fail {
            return Ok(Planned::missing_previous(record, old));
        }
        let Some(old_slot) = old_slot else {
            return Ok(Planned::missing_parent(record, old));
        };
        if old_slot.pending.is_some() || old_slot.deleted.is_some() {
            return Ok(Planned::missing_previous(record, old));
        }

        tracing::debug!(path = %old, "synthesizing placeholder for rename source");
        let placeholder = NewJournalRow {
            event_id: None,
            name: leaf_name(old)?.to_string(),
            parent_row_id: Some(anchor(&old_slot.parent)),
            previous_row_id: None,
            server_uid_id: None,
            pending: false,
            event_order: None,
            kind: ChangeKind::Created,
            is_folder: record.is_folder(),
        };
        let row = pending_row(
            record,
            new_slot,
            leaf_name(&record.new_path)?,
            ChangeKind::Renamed,
            None,
        );
        let mut plan = Plan::new(Primary::Insert(row));
        plan.placeholder = Some(placeholder);
        Ok(Planned::Ready(plan))
    }

    /// Write one pass to storage and stage its index updates.
    fn flush(&mut self, records: &mut [ChangeRecord], ready: Vec<(usize, Plan)>) -> Result<()> {
        let correlation = self.tx.next_correlation()?;
        let events = ready
            .iter()
            .enumerate()
            .map(|(k, (i, _))| {
                let correlation_index = position_in_pass(k)?;
                Ok(NewEvent {
                    record: records[*i].clone(),
                    correlation,
                    correlation_index,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.tx.insert_events(events)?;
        for event in self.tx.events_by_correlation(correlation)? {
            let Some((i, _)) = ready.get(event.correlation_index as usize) else {
                return Err(Error::invariant(format!(
                    "event {} has no record in batch {correlation}",
                    event.event_id
                )));
            };
            records[*i].event_id = Some(event.event_id);
            records[*i].correlation = Some(correlation);
        }

        // Deletes, with collapsing pairs handled as one unit
        let mut deletes = Vec::new();
        for (i, plan) in &ready {
            match &plan.primary {
                Primary::Delete(row_id) => deletes.push(*row_id),
                Primary::DeleteAndUpdate { delete, keep } => {
                    self.repoint_children(*delete, anchor(keep))?;
                    self.tx.delete_rows(&[*delete])?;
                    let mut keep = keep.clone();
                    self.stamp(&mut keep, &records[*i])?;
                    self.tx.update_row(&keep)?;
                    records[*i].journal_id = Some(keep.row_id);
                }
                _ => {}
            }
            for cascade in &plan.cascade {
                if let Cascade::Delete(row_id) = cascade {
                    deletes.push(*row_id);
                }
            }
        }
        self.tx.delete_rows(&deletes)?;

        // Inserts
        let mut inserts = Vec::new();
        let mut owners = Vec::new();
        for (i, plan) in &ready {
            if let Primary::Insert(row) = &plan.primary {
                let mut row = row.clone();
                if let Some(placeholder) = &plan.placeholder {
                    let ids = self.tx.insert_rows(vec![placeholder.clone()])?;
                    row.previous_row_id = ids.first().copied();
                }
                row.event_id = records[*i].event_id;
                row.event_order = Some(self.tx.next_event_order()?);
                inserts.push(row);
                owners.push(*i);
            }
        }
        let ids = self.tx.insert_rows(inserts)?;
        for (i, row_id) in owners.into_iter().zip(ids) {
            records[i].journal_id = Some(row_id);
        }

        // Updates
        for (i, plan) in &ready {
            if let Primary::Update(row) = &plan.primary {
                let mut row = row.clone();
                self.stamp(&mut row, &records[*i])?;
                self.tx.update_row(&row)?;
                records[*i].journal_id = Some(row.row_id);
            }
            for cascade in &plan.cascade {
                if let Cascade::Update(row) = cascade {
                    let mut row = row.clone();
                    row.event_order = Some(self.tx.next_event_order()?);
                    self.tx.update_row(&row)?;
                }
            }
        }

        for (i, plan) in &ready {
            let record = &records[*i];
            tracing::debug!(
                kind = %record.kind,
                path = %record.new_path,
                event_id = record.event_id,
                action = plan.primary.name(),
                cascade = plan.cascade.len(),
                "journaled change"
            );
            if let (Some(event_id), Some(journal_id)) = (record.event_id, record.journal_id) {
                if let Some(mut event) = self.tx.event(event_id)? {
                    event.record.journal_id = Some(journal_id);
                    self.tx.update_event(&event)?;
                }
            }
            match (record.kind, record.old_path.as_ref()) {
                (ChangeKind::Deleted, _) => self.ops.push(IndexOp::Remove(record.new_path.clone())),
                (ChangeKind::Renamed, Some(old)) => {
                    self.ops.push(IndexOp::Rename(old.clone(), record.new_path.clone()));
                    self.stage_refresh(&record.new_path, true)?;
                }
                _ => self.stage_refresh(&record.new_path, true)?,
            }
        }

        // Remote changes are already applied on the other side.
        for (i, _) in &ready {
            let record = &records[*i];
            if record.direction != Direction::FromRemote {
                continue;
            }
            let (Some(row_id), Some(metadata)) = (record.journal_id, record.metadata.as_ref()) else {
                continue;
            };
            let Some(uid) = metadata.server_uid.clone() else {
                continue;
            };
            let row = resolve::required_row(&mut self.tx, row_id)?;
            if !row.pending {
                continue;
            }
            self.assign_identity(row, &uid, metadata.revision.clone())?;
            let row = resolve::required_row(&mut self.tx, row_id)?;
            self.complete_row(row)?;
        }
        Ok(())
    }

    /// Attach the record's event and a fresh order to `row`.
    fn stamp(&mut self, row: &mut JournalRow, record: &ChangeRecord) -> Result<()> {
        row.event_id = record.event_id;
        row.event_order = Some(self.tx.next_event_order()?);
        Ok(())
    }

    /// Move every child of `from` under `to`.
    pub(super) fn repoint_children(&mut self, from: RowId, to: RowId) -> Result<()> {
        if from == to {
            return Ok(());
        }
        for mut child in self
            .tx
            .select_rows(&RowFilter::new().parent_in(vec![from]))?
        {
            child.parent_row_id = Some(to);
            self.tx.update_row(&child)?;
        }
        Ok(())
    }
}

/// Whether another unprocessed record creates `needs` (or an ancestor of it).
fn produced_elsewhere(
    records: &[ChangeRecord],
    remaining: &[usize],
    current: usize,
    needs: &FsPath,
    mode: Mode,
    case: PathCase,
) -> bool {
    remaining.iter().any(|&j| {
        let other = &records[j];
        let produces = match other.kind {
            ChangeKind::Created | ChangeKind::Renamed => true,
            ChangeKind::Modified => mode == Mode::Merge,
            ChangeKind::Deleted => false,
        };
        j != current && produces && needs.starts_with(&other.new_path, case)
    })
}
