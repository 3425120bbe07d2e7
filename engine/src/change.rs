//! Change records.
//!
//! A [`ChangeRecord`] describes one observed filesystem event. Records are
//! born from traversal or watch input (or from the remote service), consumed
//! by the journal, and handed back with their storage identifiers filled in.

use crate::{error::Result, CorrelationId, Error, EventId, FsPath, PathCase, RowId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// Fixed code/name mapping, shared by every conversion below.
const KIND_TABLE: [(ChangeKind, u8, &str); 4] = [
    (ChangeKind::Created, 1, "created"),
    (ChangeKind::Modified, 2, "modified"),
    (ChangeKind::Deleted, 3, "deleted"),
    (ChangeKind::Renamed, 4, "renamed"),
];

impl ChangeKind {
    /// All kinds, in code order.
    pub const ALL: [ChangeKind; 4] = [
        ChangeKind::Created,
        ChangeKind::Modified,
        ChangeKind::Deleted,
        ChangeKind::Renamed,
    ];

    /// Stable numeric code used in persisted rows.
    pub fn code(self) -> u8 {
        KIND_TABLE
            .iter()
            .find(|(kind, _, _)| *kind == self)
            .map_or(0, |(_, code, _)| *code)
    }

    /// Inverse of [`ChangeKind::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        KIND_TABLE
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(kind, _, _)| *kind)
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        KIND_TABLE
            .iter()
            .find(|(kind, _, _)| *kind == self)
            .map_or("", |(_, _, name)| name)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        KIND_TABLE
            .iter()
            .find(|(_, _, name)| name.eq_ignore_ascii_case(s))
            .map(|(kind, _, _)| *kind)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown change kind '{s}'")))
    }
}

/// Which side of the sync a change originated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// Observed locally, must be pushed to the remote service
    #[default]
    ToRemote,
    /// Reported by the remote service, already applied there
    FromRemote,
}

/// File attributes captured with a change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub is_folder: bool,
    #[serde(default)]
    pub size: u64,
    /// Creation time (milliseconds since epoch)
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Last write time (milliseconds since epoch)
    #[serde(default)]
    pub modified_at: Option<Timestamp>,
    /// Remote identity, required for changes coming from the remote service
    #[serde(default)]
    pub server_uid: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
}

impl EntryMetadata {
    /// Metadata for a file of the given size.
    pub fn file(size: u64) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Metadata for a folder.
    pub fn folder() -> Self {
        Self {
            is_folder: true,
            ..Self::default()
        }
    }

    /// Attach a remote identity.
    pub fn with_server_uid(mut self, uid: impl Into<String>, revision: Option<String>) -> Self {
        self.server_uid = Some(uid.into());
        self.revision = revision;
        self
    }
}

/// One filesystem event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub new_path: FsPath,
    /// Source path, only for [`ChangeKind::Renamed`]
    #[serde(default)]
    pub old_path: Option<FsPath>,
    #[serde(default)]
    pub metadata: Option<EntryMetadata>,
    #[serde(default)]
    pub direction: Direction,
    /// Journal row holding this change, once persisted
    #[serde(default)]
    pub journal_id: Option<RowId>,
    /// Event identifier, once persisted
    #[serde(default)]
    pub event_id: Option<EventId>,
    /// Batch the event was inserted with
    #[serde(default)]
    pub correlation: Option<CorrelationId>,
}

impl ChangeRecord {
    fn new(kind: ChangeKind, new_path: FsPath, old_path: Option<FsPath>, metadata: EntryMetadata) -> Self {
        Self {
            kind,
            new_path,
            old_path,
            metadata: Some(metadata),
            direction: Direction::ToRemote,
            journal_id: None,
            event_id: None,
            correlation: None,
        }
    }

    pub fn created(path: FsPath, metadata: EntryMetadata) -> Self {
        Self::new(ChangeKind::Created, path, None, metadata)
    }

    pub fn modified(path: FsPath, metadata: EntryMetadata) -> Self {
        Self::new(ChangeKind::Modified, path, None, metadata)
    }

    pub fn deleted(path: FsPath, metadata: EntryMetadata) -> Self {
        Self::new(ChangeKind::Deleted, path, None, metadata)
    }

    pub fn renamed(old_path: FsPath, new_path: FsPath, metadata: EntryMetadata) -> Self {
        Self::new(ChangeKind::Renamed, new_path, Some(old_path), metadata)
    }

    /// Mark this change as reported by the remote service.
    pub fn from_remote(mut self) -> Self {
        self.direction = Direction::FromRemote;
        self
    }

    /// The path whose current state this change depends on: the rename
    /// source for renames, the path itself otherwise.
    pub fn subject_path(&self) -> &FsPath {
        self.old_path.as_ref().unwrap_or(&self.new_path)
    }

    /// Whether the entry is a folder.
    pub fn is_folder(&self) -> bool {
        self.metadata.as_ref().is_some_and(|m| m.is_folder)
    }

    /// Check the shape of the record without touching storage.
    pub fn validate(&self) -> Result<()> {
        let Some(metadata) = self.metadata.as_ref() else {
            return Err(Error::InvalidArgument(format!(
                "{} change for {} carries no metadata",
                self.kind, self.new_path
            )));
        };
        if self.new_path.is_root() {
            return Err(Error::InvalidArgument(format!(
                "{} change has an empty path",
                self.kind
            )));
        }

        match (self.kind, self.old_path.as_ref()) {
            (ChangeKind::Renamed, None) => {
                return Err(Error::InvalidArgument(format!(
                    "rename to {} has no source path",
                    self.new_path
                )));
            }
            (ChangeKind::Renamed, Some(old)) => {
                if old.is_root() {
                    return Err(Error::InvalidArgument(format!(
                        "rename to {} has an empty source path",
                        self.new_path
                    )));
                }
                // Case-only renames are real changes; identical paths are not.
                if old.eq_with(&self.new_path, PathCase::Sensitive) {
                    return Err(Error::InvalidArgument(format!(
                        "rename of {old} onto itself"
                    )));
                }
            }
            (kind, Some(old)) => {
                return Err(Error::InvalidArgument(format!(
                    "{kind} change for {} carries a source path {old}",
                    self.new_path
                )));
            }
            (_, None) => {}
        }

        if self.direction == Direction::FromRemote && metadata.server_uid.is_none() {
            return Err(Error::InvalidArgument(format!(
                "remote {} change for {} has no server uid",
                self.kind, self.new_path
            )));
        }
        Ok(())
    }
}
