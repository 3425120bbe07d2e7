//! Journal state on disk.
//!
//! The journal lives in memory; after every mutation its snapshot is written
//! to `STATE_PATH` through a temporary file and a rename, so a crash leaves
//! either the old or the new state behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tidemark_engine::{Journal, JournalSnapshot, MemoryStorage};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::Result;

/// A snapshot captured under the journal lock, waiting to be written.
#[derive(Debug)]
pub struct PendingWrite {
    generation: u64,
    json: String,
}

/// Writes journal snapshots to one file, newest wins.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    next_generation: AtomicU64,
    /// Generation of the snapshot currently on disk
    written: Mutex<u64>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            next_generation: AtomicU64::new(1),
            written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored snapshot, if any.
    pub fn load(&self) -> Result<Option<JournalSnapshot>> {
        match std::fs::read_to_string(&self.path) {
            Ok(json) => Ok(Some(JournalSnapshot::from_json(&json)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Capture the journal's current state.
    ///
    /// Must be called while the journal is locked so generations follow the
    /// order of mutations.
    pub fn stage(&self, journal: &Journal<MemoryStorage>) -> Result<PendingWrite> {
        let json = journal.storage().export().to_json()?;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        Ok(PendingWrite { generation, json })
    }

    /// Write a staged snapshot unless a newer one is already on disk.
    pub async fn flush(&self, pending: PendingWrite) -> std::io::Result<()> {
        let mut written = self.written.lock().await;
        if pending.generation <= *written {
            tracing::trace!(generation = pending.generation, "skipping stale snapshot");
            return Ok(());
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, pending.json.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        *written = pending.generation;

        tracing::debug!(
            path = %self.path.display(),
            generation = pending.generation,
            bytes = pending.json.len(),
            "journal state saved"
        );
        Ok(())
    }
}

/// Open the journal for `config`, restoring saved state when present.
pub fn open_journal(config: &Config, store: &StateStore) -> Result<Journal<MemoryStorage>> {
    let storage = match store.load()? {
        Some(snapshot) => {
            tracing::info!(
                path = %store.path().display(),
                rows = snapshot.rows.len(),
                pending = snapshot.pending_count(),
                "restoring journal state"
            );
            MemoryStorage::import(snapshot)?
        }
        None => {
            tracing::info!(path = %store.path().display(), "no saved state, starting empty");
            MemoryStorage::new()
        }
    };
    Ok(Journal::open(
        storage,
        config.sync_root.clone(),
        config.journal_options(),
    )?)
}
