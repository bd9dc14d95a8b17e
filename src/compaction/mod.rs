//! Compaction Module
//!
//! Merges runs of segments into one deduplicated segment.
//!
//! ## Trigger Policy
//! - Live segment count above `compaction_segment_threshold`: merge the
//!   newest `min(count, max_compaction_run)` segments
//! - Tombstone ratio across live segments above `compaction_tombstone_ratio`:
//!   merge every live segment so the tombstones can be dropped
//!
//! ## Run Shape
//! A run is always a contiguous block of generations ending at the newest
//! live segment, and the output takes a fresh generation. Flushes and
//! compactions never overlap, so the output still sorts exactly where its
//! inputs did.
//!
//! Tombstones are dropped only when the run reaches the oldest live segment:
//! otherwise an older segment could still hold the value they hide.

mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::read::{MergeIterator, RecordIter};
use crate::storage::{SegmentReader, StorageManager};

pub(crate) use worker::{BackgroundWorker, Maintenance, TaskKind};

/// Why a compaction was planned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionReason {
    /// Too many live segments
    SegmentCount,
    /// Too many tombstones relative to records
    TombstoneRatio,
    /// Requested explicitly
    Manual,
}

/// Decides when and what to compact
#[derive(Debug, Clone)]
pub struct CompactionPolicy {
    segment_threshold: usize,
    tombstone_ratio: f64,
    max_run: usize,
}

/// A selected run of segments, newest first
#[derive(Debug)]
pub struct CompactionPlan {
    pub inputs: Vec<Arc<SegmentReader>>,
    /// The run includes the oldest live segment
    pub drop_tombstones: bool,
    pub reason: CompactionReason,
}

impl CompactionPlan {
    /// Generations merged by this plan
    pub fn generations(&self) -> Vec<u64> {
        self.inputs.iter().map(|s| s.generation()).collect()
    }

    pub fn contains(&self, generation: u64) -> bool {
        self.inputs.iter().any(|s| s.generation() == generation)
    }
}

/// What a finished compaction produced
#[derive(Debug)]
pub struct CompactionOutcome {
    /// The published output segment
    pub output: Arc<SegmentReader>,
    /// Records read across all inputs
    pub records_in: u64,
    /// Tombstones physically removed
    pub tombstones_dropped: u64,
}

impl CompactionPolicy {
    pub fn new(segment_threshold: usize, tombstone_ratio: f64, max_run: usize) -> Self {
        Self {
            segment_threshold,
            tombstone_ratio,
            max_run: max_run.max(2),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.compaction_segment_threshold,
            config.compaction_tombstone_ratio,
            config.max_compaction_run,
        )
    }

    /// Pick a run to compact, if any trigger fires.
    ///
    /// `segments` must be ordered newest first.
    pub fn pick(&self, segments: &[Arc<SegmentReader>]) -> Option<CompactionPlan> {
        if segments.len() > self.segment_threshold && segments.len() >= 2 {
            let take = segments.len().min(self.max_run);
            return Some(CompactionPlan {
                inputs: segments[..take].to_vec(),
                drop_tombstones: take == segments.len(),
                reason: CompactionReason::SegmentCount,
            });
        }

        let (records, tombstones) = segments.iter().fold((0u64, 0u64), |(r, t), s| {
            (r + s.meta().record_count, t + s.meta().tombstone_count)
        });
        if tombstones > 0 && tombstones as f64 / records as f64 > self.tombstone_ratio {
            return Some(CompactionPlan {
                inputs: segments.to_vec(),
                drop_tombstones: true,
                reason: CompactionReason::TombstoneRatio,
            });
        }

        None
    }

    /// Plan a compaction of every live segment regardless of thresholds
    pub fn manual(segments: &[Arc<SegmentReader>]) -> Option<CompactionPlan> {
        if segments.is_empty() {
            return None;
        }
        Some(CompactionPlan {
            inputs: segments.to_vec(),
            drop_tombstones: true,
            reason: CompactionReason::Manual,
        })
    }
}

/// Merge the plan's inputs into one new segment and publish it.
///
/// Only writes the output; swapping it into the registry and retiring the
/// inputs is up to the caller. Setting `cancel` aborts the merge with
/// [`StrataError::Closed`] and leaves no output behind.
pub fn compact(
    storage: &StorageManager,
    plan: &CompactionPlan,
    cancel: &AtomicBool,
) -> Result<CompactionOutcome> {
    let generation = storage.next_generation();
    let covers_from = plan
        .inputs
        .iter()
        .map(|s| s.meta().covers_from)
        .min()
        .unwrap_or(generation);
    let max_seq_floor = plan.inputs.iter().map(|s| s.meta().max_seq).max().unwrap_or(0);

    let mut sources: Vec<RecordIter> = Vec::with_capacity(plan.inputs.len());
    for segment in &plan.inputs {
        sources.push(Box::new(segment.iter()?));
    }
    let records_in: u64 = plan.inputs.iter().map(|s| s.record_count()).sum();

    tracing::info!(
        inputs = ?plan.generations(),
        output = generation,
        reason = ?plan.reason,
        drop_tombstones = plan.drop_tombstones,
        "Starting compaction"
    );

    let mut tombstones_dropped = 0u64;
    let drop_tombstones = plan.drop_tombstones;
    let records = MergeIterator::new(sources).filter_map(|item| {
        if cancel.load(Ordering::Acquire) {
            return Some(Err(StrataError::Closed));
        }
        match item {
            Ok(record) if drop_tombstones && record.value.is_tombstone() => {
                tombstones_dropped += 1;
                None
            }
            other => Some(other),
        }
    });

    let output = storage.write_compaction_output(generation, covers_from, max_seq_floor, records)?;

    Ok(CompactionOutcome {
        output,
        records_in,
        tombstones_dropped,
    })
}
