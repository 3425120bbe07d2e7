//! Remote identities and sync points.
//!
//! Rows reference remote identities through a local key. When the remote
//! side reports that two keys name the same item, the younger key is retired:
//! its rows move to the survivor and a forwarding entry keeps late callers
//! working. Lookups compress forwarding chains as they go.

use super::JournalTx;
use crate::storage::{JournalRow, RowFilter, ServerUidRow, Storage, SyncPoint, Transaction};
use crate::{error::Result, Error, EventId, ServerUidId};

/// Longest forwarding chain tolerated before assuming a cycle.
const MAX_FORWARDING: usize = 4096;

impl<'j, S: Storage + 'j> JournalTx<'j, S> {
    /// Identity row for `id`, following retired keys.
    pub fn server_uid(&mut self, id: ServerUidId) -> Result<Option<ServerUidRow>> {
        let id = self.resolve_uid(id)?;
        self.tx.server_uid(id)
    }

    /// Attach `server_uid` to the row holding `event_id`.
    pub fn set_remote_identity(
        &mut self,
        event_id: EventId,
        server_uid: &str,
        revision: Option<String>,
    ) -> Result<ServerUidId> {
        let row = self.row_for_event(event_id)?;
        let id = self.assign_identity(row, server_uid, revision)?;
        tracing::debug!(event_id, server_uid, server_uid_id = id, "remote identity set");
        Ok(id)
    }

    /// Complete every confirmed change still pending and store the sync point.
    pub fn record_sync_point(
        &mut self,
        remote_sync_id: &str,
        confirmed_event_ids: &[EventId],
        root_identity: Option<&str>,
    ) -> Result<SyncPoint> {
        if remote_sync_id.is_empty() {
            return Err(Error::InvalidArgument("remote sync id is empty".into()));
        }

        let mut rows: Vec<JournalRow> = Vec::new();
        for &event_id in confirmed_event_ids {
            match self.row_for_event(event_id) {
                Ok(row) if !row.pending => {
                    tracing::info!(event_id, "confirmed change is already committed");
                }
                Ok(row) => {
                    if rows.iter().all(|r| r.row_id != row.row_id) {
                        rows.push(row);
                    }
                }
                Err(Error::InvalidState(_)) => {
                    tracing::info!(event_id, "confirmed change was superseded");
                }
                Err(Error::NotFound(_)) => {
                    tracing::warn!(event_id, "confirmed change is unknown");
                }
                Err(err) => return Err(err),
            }
        }

        // Parents complete before their children.
        rows.sort_by_key(|row| (row.event_order, row.row_id));
        let mut completed = 0usize;
        for row in rows {
            // An earlier completion may have swallowed this row.
            match self.tx.row(row.row_id)? {
                Some(current) if current.pending => {
                    self.complete_row(current)?;
                    completed += 1;
                }
                _ => tracing::info!(row_id = row.row_id, "confirmed row no longer pending"),
            }
        }

        if let Some(uid) = root_identity {
            let root = super::resolve::required_row(&mut self.tx, self.ctx.root_row)?;
            self.assign_identity(root, uid, None)?;
        }

        let point = self.tx.insert_sync_point(
            remote_sync_id.to_string(),
            confirmed_event_ids.to_vec(),
            root_identity.map(str::to_string),
        )?;
        tracing::info!(
            remote_sync_id,
            sync_point_id = point.sync_point_id,
            completed,
            "sync point recorded"
        );
        Ok(point)
    }

    /// Surviving key for `id`. Every key visited on the way is pointed
    /// straight at the survivor.
    pub(super) fn resolve_uid(&mut self, id: ServerUidId) -> Result<ServerUidId> {
        let mut visited = Vec::new();
        let mut current = id;
        while let Some(next) = self.tx.forwarding(current)? {
            visited.push(current);
            if visited.len() > MAX_FORWARDING {
                return Err(Error::invariant(format!(
                    "forwarding for identity key {id} does not terminate"
                )));
            }
            current = next;
        }
        if visited.len() > 1 {
            for &key in &visited[..visited.len() - 1] {
                self.tx.set_forwarding(key, current)?;
            }
        }
        Ok(current)
    }

    pub(super) fn assign_identity(
        &mut self,
        mut row: JournalRow,
        server_uid: &str,
        revision: Option<String>,
    ) -> Result<ServerUidId> {
        if server_uid.is_empty() {
            return Err(Error::InvalidArgument("server uid is empty".into()));
        }
        let current = match row.server_uid_id {
            Some(id) => Some(self.resolve_uid(id)?),
            None => None,
        };
        let existing = self.tx.find_server_uid(server_uid)?;

        let id = match (current, existing) {
            (None, None) => self
                .tx
                .insert_server_uid(Some(server_uid.to_string()), revision)?,
            (None, Some(existing)) => self.update_revision(existing, revision)?,
            (Some(current), Some(existing)) if current == existing.server_uid_id => {
                self.update_revision(existing, revision)?
            }
            (Some(current), Some(existing)) => {
                self.merge_uids(current, existing.server_uid_id)?;
                self.update_revision(existing, revision)?
            }
            (Some(current), None) => {
                let mut uid = self.tx.server_uid(current)?.ok_or_else(|| {
                    Error::invariant(format!("identity key {current} does not exist"))
                })?;
                uid.server_uid = Some(server_uid.to_string());
                if revision.is_some() {
                    uid.revision = revision;
                }
                self.tx.update_server_uid(&uid)?;
                current
            }
        };

        if row.server_uid_id != Some(id) {
            row.server_uid_id = Some(id);
            self.tx.update_row(&row)?;
        }
        Ok(id)
    }

    fn update_revision(
        &mut self,
        mut uid: ServerUidRow,
        revision: Option<String>,
    ) -> Result<ServerUidId> {
        if revision.is_some() && uid.revision != revision {
            uid.revision = revision;
            self.tx.update_server_uid(&uid)?;
        }
        Ok(uid.server_uid_id)
    }

    /// Retire `loser` in favour of `winner`.
    fn merge_uids(&mut self, loser: ServerUidId, winner: ServerUidId) -> Result<()> {
        for mut row in self
            .tx
            .select_rows(&RowFilter::new().server_uid_id(loser))?
        {
            row.server_uid_id = Some(winner);
            self.tx.update_row(&row)?;
        }
        for retired in self.tx.forwarded_to(loser)? {
            self.tx.set_forwarding(retired, winner)?;
        }
        self.tx.set_forwarding(loser, winner)?;
        self.tx.delete_server_uid(loser)?;
        tracing::debug!(loser, winner, "identity keys merged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Journal, JournalOptions};
    use super::*;
    use crate::{ChangeKind, ChangeRecord, EntryMetadata, FsPath, MemoryStorage, Notification};

    fn p(s: &str) -> FsPath {
        FsPath::parse(s).unwrap()
    }

    fn journal() -> Journal<MemoryStorage> {
        Journal::open(MemoryStorage::new(), p("root"), JournalOptions::default()).unwrap()
    }

    fn created(journal: &mut Journal<MemoryStorage>, path: &str) -> EventId {
        journal
            .merge(vec![ChangeRecord::created(p(path), EntryMetadata::file(1))])
            .unwrap()
            .value[0]
            .event_id
            .unwrap()
    }

    #[test]
    fn identity_is_created_then_reused() {
        let mut journal = journal();
        let f = created(&mut journal, "root/f");
        let id = journal.set_remote_identity(f, "uid-1", Some("r1".into())).unwrap().value;
        let again = journal.set_remote_identity(f, "uid-1", Some("r2".into())).unwrap().value;
        assert_eq!(id, again);

        let uid = journal.server_uid(id).unwrap().unwrap();
        assert_eq!(uid.server_uid.as_deref(), Some("uid-1"));
        assert_eq!(uid.revision.as_deref(), Some("r2"));
        assert_eq!(journal.get_path_for_remote_identity("uid-1").unwrap(), Some(p("root/f")));
        assert!(matches!(
            journal.set_remote_identity(f, "", None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn conflicting_keys_are_merged_and_forwarded() {
        let mut journal = journal();
        let f = created(&mut journal, "root/f");
        let g = created(&mut journal, "root/g");
        let kept = journal.set_remote_identity(f, "uid-1", None).unwrap().value;
        let retired = journal.set_remote_identity(g, "uid-2", None).unwrap().value;
        assert_ne!(kept, retired);

        let id = journal.set_remote_identity(g, "uid-1", None).unwrap().value;
        assert_eq!(id, kept);
        // The retired key still resolves
        let uid = journal.server_uid(retired).unwrap().unwrap();
        assert_eq!(uid.server_uid_id, kept);
        assert!(journal.storage().rows().all(|r| r.server_uid_id != Some(retired)));
        assert_eq!(journal.storage().export().forwarding.get(&retired), Some(&kept));
    }

    #[test]
    fn forwarding_chains_are_compressed() {
        let mut storage = MemoryStorage::new();
        {
            let mut tx = storage.begin().unwrap();
            for uid in ["a", "b", "c"] {
                tx.insert_server_uid(Some(uid.into()), None).unwrap();
            }
            tx.set_forwarding(1, 2).unwrap();
            tx.set_forwarding(2, 3).unwrap();
            tx.commit().unwrap();
        }
        let mut journal = Journal::open(storage, p("root"), JournalOptions::default()).unwrap();
        let uid = journal.server_uid(1).unwrap().unwrap();
        assert_eq!(uid.server_uid.as_deref(), Some("c"));
        assert_eq!(journal.storage().export().forwarding.get(&1), Some(&3));
    }

    #[test]
    fn sync_point_completes_confirmed_changes_in_order() {
        let mut journal = journal();
        let outcome = journal
            .merge(vec![
                ChangeRecord::created(p("root/a/x"), EntryMetadata::file(1)),
                ChangeRecord::created(p("root/a"), EntryMetadata::folder()),
            ])
            .unwrap();
        let x = outcome.value[0].event_id.unwrap();
        let a = outcome.value[1].event_id.unwrap();
        journal.set_remote_identity(x, "uid-x", None).unwrap();
        journal.set_remote_identity(a, "uid-a", None).unwrap();

        let outcome = journal
            .record_sync_point("sync-1", &[x, a, 404], Some("uid-root"))
            .unwrap();
        assert_eq!(outcome.value.remote_sync_id, "sync-1");
        assert_eq!(
            outcome.notifications,
            vec![
                Notification::Synced {
                    path: p("root/a"),
                    kind: ChangeKind::Created
                },
                Notification::Synced {
                    path: p("root/a/x"),
                    kind: ChangeKind::Created
                },
            ]
        );
        assert!(journal.pending_changes().unwrap().is_empty());
        assert_eq!(journal.get_path_for_remote_identity("uid-root").unwrap(), Some(p("root")));
        assert_eq!(journal.latest_sync_point().unwrap(), Some(outcome.value));

        // Confirming again is harmless
        journal.record_sync_point("sync-2", &[x], None).unwrap();
    }
}
