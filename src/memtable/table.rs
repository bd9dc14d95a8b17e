//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::record::{Record, Value};

use super::{MemTableEntry, MemTableState};

/// Fixed per-entry overhead added to the size estimate (sequence number,
/// value tag and map bookkeeping)
const ENTRY_OVERHEAD: usize = 16;

/// In-memory table for recent writes
pub struct MemTable {
    /// Sorted entries
    data: RwLock<BTreeMap<Vec<u8>, MemTableEntry>>,

    /// Approximate footprint in bytes
    size: AtomicUsize,

    /// Highest sequence number inserted (0 when empty)
    max_seq: AtomicU64,

    /// Id of the WAL file protecting this memtable
    wal_id: u64,

    state: AtomicU8,
}

impl MemTable {
    /// Create a new empty MemTable not tied to any WAL
    pub fn new() -> Self {
        Self::with_wal_id(0)
    }

    /// Create a new empty MemTable protected by the WAL with this id
    pub fn with_wal_id(wal_id: u64) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
            max_seq: AtomicU64::new(0),
            wal_id,
            state: AtomicU8::new(MemTableState::Active as u8),
        }
    }

    /// Insert a value or tombstone, replacing any previous entry for the key.
    ///
    /// Returns the new approximate size.
    pub fn insert(&self, key: Vec<u8>, value: Value, seq: u64) -> usize {
        let added = entry_size(&key, &value);
        let mut data = self.data.write();

        let removed = data
            .get(key.as_slice())
            .map(|old| entry_size(&key, &old.value))
            .unwrap_or(0);
        data.insert(key, MemTableEntry { value, seq });
        self.max_seq.fetch_max(seq, Ordering::AcqRel);

        if added >= removed {
            self.size.fetch_add(added - removed, Ordering::AcqRel) + (added - removed)
        } else {
            self.size.fetch_sub(removed - added, Ordering::AcqRel) - (removed - added)
        }
    }

    /// Put a key-value pair
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, seq: u64) -> usize {
        self.insert(key, Value::Put(value), seq)
    }

    /// Delete a key (inserts tombstone)
    pub fn delete(&self, key: Vec<u8>, seq: u64) -> usize {
        self.insert(key, Value::Tombstone, seq)
    }

    /// Get the entry for a key. A tombstone is returned as an entry, not as
    /// absence.
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.data.read().get(key).cloned()
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if should flush (size >= limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() >= size_limit
    }

    /// Highest sequence number held, 0 if empty
    pub fn max_seq(&self) -> u64 {
        self.max_seq.load(Ordering::Acquire)
    }

    /// Id of the WAL file backing this memtable
    pub fn wal_id(&self) -> u64 {
        self.wal_id
    }

    pub fn state(&self) -> MemTableState {
        MemTableState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn mark_flushing(&self) {
        self.state
            .store(MemTableState::Flushing as u8, Ordering::Release);
    }

    pub(crate) fn mark_retired(&self) {
        self.state
            .store(MemTableState::Retired as u8, Ordering::Release);
    }

    /// Iterate over all entries in ascending key order
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        self.range(Bound::Unbounded, Bound::Unbounded)
    }

    /// Iterate over the entries within bounds in ascending key order
    pub fn range(self: &Arc<Self>, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> MemTableIterator {
        MemTableIterator {
            table: Arc::clone(self),
            cursor: lower,
            upper,
            done: false,
        }
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_size(key: &[u8], value: &Value) -> usize {
    key.len() + value.len() + ENTRY_OVERHEAD
}

/// Cursor over MemTable entries
///
/// Each step re-seeks past the last key returned, so the iterator is lazy and
/// holds no lock between calls. Writes landing after the cursor are observed.
pub struct MemTableIterator {
    table: Arc<MemTable>,
    cursor: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    done: bool,
}

impl Iterator for MemTableIterator {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || range_is_empty(&self.cursor, &self.upper) {
            self.done = true;
            return None;
        }

        let next = {
            let data = self.table.data.read();
            let bounds = (as_slice_bound(&self.cursor), as_slice_bound(&self.upper));
            data.range::<[u8], _>(bounds)
                .next()
                .map(|(key, entry)| Record::new(key.clone(), entry.value.clone(), entry.seq))
        };

        match next {
            Some(record) => {
                self.cursor = Bound::Excluded(record.key.clone());
                Some(record)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

fn as_slice_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// `BTreeMap::range` panics on inverted bounds; detect them up front
fn range_is_empty(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}
