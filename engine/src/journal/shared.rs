//! Process-wide journal handle.

use super::Journal;
use crate::storage::Storage;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// A journal shared between threads.
///
/// The lock covers storage and the in-memory index together, so two callers
/// merging changes for the same item never both decide to insert it.
#[derive(Debug)]
pub struct SharedJournal<S: Storage>(Arc<Mutex<Journal<S>>>);

impl<S: Storage> Clone for SharedJournal<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<S: Storage> SharedJournal<S> {
    pub fn new(journal: Journal<S>) -> Self {
        Self(Arc::new(Mutex::new(journal)))
    }

    /// Hold the journal for a sequence of calls.
    pub fn lock(&self) -> MutexGuard<'_, Journal<S>> {
        self.0.lock()
    }

    /// Run `f` with exclusive access to the journal.
    pub fn with<T>(&self, f: impl FnOnce(&mut Journal<S>) -> T) -> T {
        f(&mut self.0.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::super::JournalOptions;
    use super::*;
    use crate::{ChangeRecord, EntryMetadata, FsPath, MemoryStorage};
    use std::thread;

    #[test]
    fn concurrent_merges_of_the_same_item_insert_once() {
        let root = FsPath::parse("root").unwrap();
        let journal = Journal::open(MemoryStorage::new(), root, JournalOptions::default()).unwrap();
        let shared = SharedJournal::new(journal);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let path = FsPath::parse("root/same.txt").unwrap();
                    shared.with(|j| j.merge(vec![ChangeRecord::created(path, EntryMetadata::file(i))]))
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let journal = shared.lock();
        assert_eq!(journal.storage().row_count(), 2);
        assert_eq!(journal.index().count(), 1);
    }
}
