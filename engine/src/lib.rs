//! # Tidemark Engine
//!
//! The local change-tracking index of a file-synchronization client.
//!
//! This crate keeps an authoritative, queryable picture of a watched
//! directory tree together with a durable, ordered journal of filesystem
//! changes that still have to be reconciled with a remote service.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches the filesystem or the network;
//!   storage sits behind the [`Storage`] trait
//! - **Transactional**: every call runs in one storage transaction and the
//!   in-memory index only changes after it commits
//! - **Order independent**: callers do not have to sort dependent changes
//!
//! ## Core Concepts
//!
//! ### Paths
//!
//! [`FsPath`] is an immutable path value compared case-insensitively by
//! default ([`PathCase`]). [`PathTrie`] maps paths to values and moves whole
//! subtrees in one step.
//!
//! ### Changes
//!
//! A [`ChangeRecord`] describes one `Created`, `Modified`, `Deleted` or
//! `Renamed` event. The [`Journal`] records it as a pending row, merges it
//! with earlier pending changes ([`Journal::merge`]) and folds it into the
//! committed state once the remote service confirms it
//! ([`Journal::mark_completed`], [`Journal::record_sync_point`]).
//!
//! ### Notifications
//!
//! Mutating calls return an [`Outcome`] carrying the [`Notification`]s the
//! caller should forward to observers.
//!
//! ## Quick Start
//!
//! ```rust
//! use tidemark_engine::{
//!     ChangeKind, ChangeRecord, EntryMetadata, FsPath, Journal, JournalOptions, MemoryStorage,
//! };
//!
//! let root = FsPath::parse("sync").unwrap();
//! let mut journal = Journal::open(MemoryStorage::new(), root, JournalOptions::default()).unwrap();
//!
//! // Children may come before their parents
//! let outcome = journal
//!     .merge(vec![
//!         ChangeRecord::created(FsPath::parse("sync/docs/a.txt").unwrap(), EntryMetadata::file(3)),
//!         ChangeRecord::created(FsPath::parse("sync/docs").unwrap(), EntryMetadata::folder()),
//!     ])
//!     .unwrap();
//! assert_eq!(outcome.notifications.len(), 2);
//!
//! // The remote service confirms the folder
//! let folder_event = outcome.value[1].event_id.unwrap();
//! journal.set_remote_identity(folder_event, "remote-1", None).unwrap();
//! journal.mark_completed(folder_event).unwrap();
//!
//! let entry = journal.lookup(&FsPath::parse("sync/docs").unwrap()).unwrap();
//! assert_eq!(entry.kind, ChangeKind::Created);
//! assert!(!entry.pending);
//! assert_eq!(journal.pending_changes().unwrap().len(), 1);
//! ```
//!
//! ## Persistence
//!
//! [`MemoryStorage::export`] and [`MemoryStorage::import`] convert the
//! tables to and from a [`JournalSnapshot`], which serializes to JSON with
//! deterministic ordering.

pub mod change;
pub mod error;
pub mod journal;
pub mod path;
pub mod snapshot;
pub mod storage;
pub mod trie;

// Re-export main types at crate root
pub use change::{ChangeKind, ChangeRecord, Direction, EntryMetadata};
pub use error::Error;
pub use journal::{
    IndexEntry, Journal, JournalOptions, JournalTx, Notification, Outcome, PreviousFallback,
    SharedJournal, SnapshotEntry,
};
pub use path::{FsPath, PathCase};
pub use snapshot::{JournalSnapshot, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION};
pub use storage::{
    EventRow, JournalRow, MemoryStorage, ServerUidRow, Storage, SyncPoint, Transaction,
};
pub use trie::{Hierarchy, Moved, PathTrie, Removed};

/// Type aliases for clarity
pub type RowId = u64;
pub type EventId = u64;
pub type ServerUidId = u64;
pub type CorrelationId = u64;
pub type EventOrder = u64;
pub type Timestamp = u64;
