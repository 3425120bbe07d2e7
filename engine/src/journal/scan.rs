//! Initial indexing from a directory traversal.

use super::JournalTx;
use crate::storage::Storage;
use crate::trie::PathTrie;
use crate::{error::Result, ChangeRecord, EntryMetadata, FsPath, Timestamp};
use serde::{Deserialize, Serialize};

/// One item reported by a recursive traversal of the sync root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub path: FsPath,
    pub is_folder: bool,
    #[serde(default)]
    pub size: u64,
    pub created_at: Option<Timestamp>,
    pub modified_at: Option<Timestamp>,
}

impl SnapshotEntry {
    fn into_record(self) -> ChangeRecord {
        let metadata = EntryMetadata {
            is_folder: self.is_folder,
            size: if self.is_folder { 0 } else { self.size },
            created_at: self.created_at,
            modified_at: self.modified_at,
            ..EntryMetadata::default()
        };
        ChangeRecord::created(self.path, metadata)
    }
}

impl<'j, S: Storage + 'j> JournalTx<'j, S> {
    /// Record every entry the journal does not know yet as a creation.
    ///
    /// Entries may arrive in any order; parents are resolved through the
    /// batch deferral passes. Entries go through merge rules, so an item
    /// with a pending delete that is still on disk turns into a
    /// modification. Repeated paths count once.
    pub fn index_snapshot(&mut self, entries: Vec<SnapshotEntry>) -> Result<Vec<ChangeRecord>> {
        let total = entries.len();
        let mut seen = PathTrie::with_root(self.ctx.root_path.clone(), self.ctx.case);
        let mut records = Vec::with_capacity(total);
        for entry in entries {
            if entry.path.eq_with(&self.ctx.root_path, self.ctx.case) {
                continue;
            }
            self.ctx.check_inside(&entry.path)?;
            if self.index.contains(&entry.path) {
                continue;
            }
            if seen.add(&entry.path, ()).is_err() {
                tracing::debug!(path = %entry.path, "duplicate traversal entry");
                continue;
            }
            records.push(entry.into_record());
        }

        tracing::info!(total, new = records.len(), "indexing traversal snapshot");
        if records.is_empty() {
            return Ok(records);
        }
        self.merge(records)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Journal, JournalOptions};
    use super::*;
    use crate::{ChangeKind, Error, MemoryStorage};

    fn p(s: &str) -> FsPath {
        FsPath::parse(s).unwrap()
    }

    fn entry(path: &str, is_folder: bool) -> SnapshotEntry {
        SnapshotEntry {
            path: p(path),
            is_folder,
            size: 10,
            created_at: Some(1),
            modified_at: Some(2),
        }
    }

    #[test]
    fn snapshot_order_does_not_matter() {
        let mut journal =
            Journal::open(MemoryStorage::new(), p("root"), JournalOptions::default()).unwrap();
        let outcome = journal
            .index_snapshot(vec![
                entry("root/a/b/c.txt", false),
                entry("root", true),
                entry("root/a/b", true),
                entry("root/a", true),
            ])
            .unwrap();
        assert_eq!(outcome.value.len(), 3);
        assert_eq!(journal.index().count(), 3);
        let file = journal.lookup(&p("root/a/b/c.txt")).unwrap();
        assert_eq!(file.kind, ChangeKind::Created);
        assert!(!file.is_folder);

        // A second pass only adds what is new.
        let outcome = journal
            .index_snapshot(vec![entry("root/a", true), entry("root/d", false)])
            .unwrap();
        assert_eq!(outcome.value.len(), 1);
        assert_eq!(outcome.value[0].new_path, p("root/d"));
    }

    #[test]
    fn rescan_after_pending_delete_restores_the_item() {
        let mut journal =
            Journal::open(MemoryStorage::new(), p("root"), JournalOptions::default()).unwrap();
        let outcome = journal.index_snapshot(vec![entry("root/f", false)]).unwrap();
        let event_id = outcome.value[0].event_id.unwrap();
        journal.set_remote_identity(event_id, "uid-f", None).unwrap();
        journal.mark_completed(event_id).unwrap();

        journal
            .merge(vec![ChangeRecord::deleted(p("root/f"), EntryMetadata::file(10))])
            .unwrap();
        assert!(journal.lookup(&p("root/f")).is_none());

        let outcome = journal.index_snapshot(vec![entry("root/f", false)]).unwrap();
        assert_eq!(outcome.value.len(), 1);
        let restored = journal.lookup(&p("root/f")).unwrap();
        assert_eq!(restored.kind, ChangeKind::Modified);
        assert!(restored.pending);
        assert_eq!(journal.pending_changes().unwrap().len(), 1);
    }

    #[test]
    fn repeated_entries_count_once() {
        let mut journal =
            Journal::open(MemoryStorage::new(), p("root"), JournalOptions::default()).unwrap();
        let outcome = journal
            .index_snapshot(vec![
                entry("root/a", true),
                entry("root/A", true),
                entry("root/a", true),
                entry("root/a/x", false),
            ])
            .unwrap();
        assert_eq!(outcome.value.len(), 2);
        assert_eq!(journal.index().count(), 2);
    }

    #[test]
    fn entries_outside_the_root_are_rejected() {
        let mut journal =
            Journal::open(MemoryStorage::new(), p("root"), JournalOptions::default()).unwrap();
        assert!(matches!(
            journal.index_snapshot(vec![entry("other/x", false)]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn entry_deserializes_from_camel_case() {
        let entry: SnapshotEntry = serde_json::from_str(
            r#"{"path":"root/a","isFolder":true,"createdAt":null,"modifiedAt":5}"#,
        )
        .unwrap();
        assert_eq!(entry.path, p("root/a"));
        assert_eq!(entry.size, 0);
        assert_eq!(entry.modified_at, Some(5));
    }
}
