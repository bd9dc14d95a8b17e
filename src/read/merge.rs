//! K-way merge over sorted record sources
//!
//! Shared by range scans and compaction.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Result, StrataError};
use crate::record::Record;

/// A sorted, fallible stream of records
pub type RecordIter = Box<dyn Iterator<Item = Result<Record>> + Send>;

struct HeapEntry {
    record: Record,
    /// Position of the source; lower = more recent
    source: usize,
}

impl Ord for HeapEntry {
    /// BinaryHeap is a max-heap, so "greater" pops first:
    /// smallest key, then highest sequence number, then most recent source.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .record
            .key
            .cmp(&self.record.key)
            .then_with(|| self.record.seq.cmp(&other.record.seq))
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Merges sources ordered most recent first into one ascending stream with
/// exactly one record per key: the one with the highest sequence number
/// (ties go to the more recent source). Tombstones are passed through.
///
/// Every source must yield strictly ascending keys. Iteration stops after
/// the first error.
pub struct MergeIterator {
    sources: Vec<RecordIter>,
    heap: BinaryHeap<HeapEntry>,
    pending_error: Option<StrataError>,
    done: bool,
}

impl MergeIterator {
    pub fn new(sources: Vec<RecordIter>) -> Self {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            pending_error: None,
            done: false,
        };
        for source in 0..merge.sources.len() {
            if let Err(e) = merge.advance(source) {
                merge.pending_error = Some(e);
                break;
            }
        }
        merge
    }

    /// Number of sources being merged
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Pull the next record of `source` into the heap
    fn advance(&mut self, source: usize) -> Result<()> {
        match self.sources[source].next() {
            Some(Ok(record)) => {
                self.heap.push(HeapEntry { record, source });
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Ok(()),
        }
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }

        let top = match self.heap.pop() {
            Some(top) => top,
            None => return Ok(None),
        };
        // A failing source still lets the record already in hand through;
        // the error surfaces on the following call.
        if let Err(e) = self.advance(top.source) {
            self.pending_error = Some(e);
            return Ok(Some(top.record));
        }

        // Drop the shadowed versions of this key from the other sources
        while self
            .heap
            .peek()
            .map_or(false, |entry| entry.record.key == top.record.key)
        {
            if let Some(shadowed) = self.heap.pop() {
                if let Err(e) = self.advance(shadowed.source) {
                    self.pending_error = Some(e);
                    break;
                }
            }
        }

        Ok(Some(top.record))
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
