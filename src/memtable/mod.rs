//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Single-writer/multi-reader access pattern
//! - Track size for flush triggers
//! - Ordered iteration for scans and segment creation
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock:
//! - Ordered keys (required for segment generation and range scans)
//! - Iterators are cursors over an `Arc<MemTable>`, re-seeking under a short
//!   read lock per step, so no lock is held between calls to `next()`
//!
//! ## Lifecycle
//! ```text
//! ACTIVE ──freeze──▶ FLUSHING ──segment published──▶ RETIRED
//! ```

mod table;

use crate::record::Value;

pub use table::{MemTable, MemTableIterator};

/// Entry stored in the MemTable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemTableEntry {
    /// Value or tombstone
    pub value: Value,

    /// Sequence number of the write
    pub seq: u64,
}

/// Lifecycle state of a memtable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemTableState {
    /// Accepting writes
    Active = 0,

    /// Frozen and being written to a segment; a new active memtable exists
    Flushing = 1,

    /// Segment published; the backing WAL may be deleted
    Retired = 2,
}

impl MemTableState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => MemTableState::Active,
            1 => MemTableState::Flushing,
            _ => MemTableState::Retired,
        }
    }
}
