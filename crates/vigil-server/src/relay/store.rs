//! Deduplicating in-memory record store.

use std::collections::HashSet;

use parking_lot::RwLock;
use vigil_core::records::BulletinRecord;

/// Result of [`RecordStore::insert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was new and is now stored.
    Inserted,
    /// A record with the same ID already exists; nothing changed.
    AlreadyPresent,
}

struct Inner<T> {
    ids: HashSet<String>,
    records: Vec<T>,
}

/// Append-only collection keyed by record ID.
///
/// The ID check and the insert happen under one write lock, so two
/// concurrent inserts of the same ID store it once.
pub struct RecordStore<T> {
    inner: RwLock<Inner<T>>,
}

impl<T: BulletinRecord> RecordStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                ids: HashSet::new(),
                records: Vec::new(),
            }),
        }
    }

    /// Store `record` unless its ID is already present.
    pub fn insert(&self, record: T) -> InsertOutcome {
        let mut inner = self.inner.write();
        if inner.ids.insert(record.record_id().to_owned()) {
            inner.records.push(record);
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyPresent
        }
    }

    /// Look up a record by ID.
    pub fn get(&self, id: &str) -> Option<T> {
        let inner = self.inner.read();
        if !inner.ids.contains(id) {
            return None;
        }
        inner.records.iter().find(|r| r.record_id() == id).cloned()
    }

    /// Whether a record with this ID exists.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().ids.contains(id)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in insertion order.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.read().records.clone()
    }

    /// Records matching `predicate`, in insertion order.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.inner
            .read()
            .records
            .iter()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }
}

impl<T: BulletinRecord> Default for RecordStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
