//! Read Path Module
//!
//! Answers point lookups and range scans by composing the memtables with the
//! segment chain.
//!
//! ## Source Order (most recent first)
//! ```text
//! active memtable → frozen memtables (newest first) → segments (newest generation first)
//! ```
//! A point lookup stops at the first source holding the key; a tombstone hit
//! means "deleted". A scan merges every source at once (see [`MergeIterator`]).

mod merge;

use std::ops::Bound;
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::memtable::MemTable;
use crate::record::Record;
use crate::storage::SegmentReader;

pub use merge::{MergeIterator, RecordIter};

/// An immutable view of every readable source at one instant
///
/// The engine swaps whole views atomically; a reader that cloned an
/// `Arc<ReadView>` keeps a coherent set of memtables and segments (and
/// keeps retired segment files alive) for as long as it needs them.
#[derive(Clone)]
pub struct ReadView {
    /// Memtable accepting writes
    pub active: Arc<MemTable>,

    /// Frozen memtables waiting for flush, newest first
    pub frozen: Vec<Arc<MemTable>>,

    /// Live segments, newest generation first
    pub segments: Vec<Arc<SegmentReader>>,
}

impl ReadView {
    pub fn new(active: Arc<MemTable>, segments: Vec<Arc<SegmentReader>>) -> Self {
        Self {
            active,
            frozen: Vec::new(),
            segments,
        }
    }

    /// Newest visible version of `key`, tombstones included
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Record>> {
        for memtable in self.memtables() {
            if let Some(entry) = memtable.get(key) {
                return Ok(Some(Record::new(key, entry.value, entry.seq)));
            }
        }

        for segment in &self.segments {
            if let Some(record) = segment.get(key)? {
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    /// Current value of `key`; `None` if absent or deleted
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.lookup(key)?.and_then(|record| record.value.into_bytes()))
    }

    /// Live key/value pairs with `low <= key <= high`, ascending
    pub fn scan(&self, low: &[u8], high: &[u8]) -> Result<ScanIterator> {
        if low > high {
            return Ok(ScanIterator::new(MergeIterator::new(Vec::new())));
        }

        let lower = Bound::Included(low.to_vec());
        let upper = Bound::Included(high.to_vec());

        let mut sources: Vec<RecordIter> = Vec::new();
        for memtable in self.memtables() {
            let records = memtable.range(lower.clone(), upper.clone());
            sources.push(Box::new(records.map(Ok::<Record, StrataError>)));
        }
        for segment in &self.segments {
            if segment.meta().overlaps(low, high) {
                sources.push(Box::new(segment.range(lower.clone(), upper.clone())?));
            }
        }

        Ok(ScanIterator::new(MergeIterator::new(sources)))
    }

    /// Memtables, most recent first
    pub fn memtables(&self) -> impl Iterator<Item = &Arc<MemTable>> {
        std::iter::once(&self.active).chain(self.frozen.iter())
    }
}

/// Range scan output: merged, deduplicated, tombstones removed
pub struct ScanIterator {
    inner: MergeIterator,
}

impl ScanIterator {
    fn new(inner: MergeIterator) -> Self {
        Self { inner }
    }
}

impl Iterator for ScanIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(record) => {
                    if let Some(value) = record.value.into_bytes() {
                        return Some(Ok((record.key, value)));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
