//! Storage Module
//!
//! Persistent storage layer built from immutable, sorted segment files.
//!
//! ## Responsibilities
//! - Persist sorted records to disk (memtable flushes, compaction output)
//! - Point lookups through a sparse index, lazy range scans
//! - Atomic publish: a segment is visible only once fully written
//! - Deferred deletion of segments retired by compaction
//!
//! See [`segment`] for the on-disk layout.

pub mod segment;
mod manager;

pub use segment::{SegmentBuilder, SegmentIterator, SegmentMeta, SegmentReader};
pub use manager::StorageManager;
