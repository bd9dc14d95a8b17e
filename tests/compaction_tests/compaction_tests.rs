//! Tests for Compaction
//!
//! These tests verify:
//! - Trigger policy (segment count, tombstone ratio, manual)
//! - Run selection (newest segments, bounded run length)
//! - Merge output: newest version per key, tombstone retention rules
//! - Output generation and covered range
//! - Cancellation leaves nothing behind

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use strata::compaction::{self, CompactionPolicy, CompactionReason};
use strata::record::Record;
use strata::storage::{SegmentReader, StorageManager};
use strata::{Config, StrataError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_storage() -> (TempDir, StorageManager) {
    let temp_dir = TempDir::new().unwrap();
    let (storage, _) = StorageManager::open(&temp_dir.path().join("segments"), 4).unwrap();
    (temp_dir, storage)
}

/// Write a segment and return the live list with it prepended (newest first)
fn push_segment(storage: &StorageManager, live: &mut Vec<Arc<SegmentReader>>, records: Vec<Record>) {
    let generation = storage.next_generation();
    let segment = storage
        .write_segment(generation, generation, records.into_iter().map(Ok))
        .unwrap();
    live.insert(0, segment);
}

fn contents(segment: &Arc<SegmentReader>) -> Vec<Record> {
    segment.iter().unwrap().map(|r| r.unwrap()).collect()
}

fn not_cancelled() -> AtomicBool {
    AtomicBool::new(false)
}

// =============================================================================
// Policy Tests
// =============================================================================

#[test]
fn test_no_trigger_below_thresholds() {
    let (_temp, storage) = setup_temp_storage();
    let mut live = Vec::new();
    for i in 0..4u64 {
        push_segment(&storage, &mut live, vec![Record::put(format!("k{}", i), "v", i + 1)]);
    }

    let policy = CompactionPolicy::new(4, 0.5, 16);

    assert!(policy.pick(&live).is_none());
    assert!(policy.pick(&[]).is_none());
}

#[test]
fn test_segment_count_trigger_takes_all_when_run_allows() {
    let (_temp, storage) = setup_temp_storage();
    let mut live = Vec::new();
    for i in 0..5u64 {
        push_segment(&storage, &mut live, vec![Record::put(format!("k{}", i), "v", i + 1)]);
    }

    let plan = CompactionPolicy::new(4, 0.5, 16).pick(&live).unwrap();

    assert_eq!(plan.reason, CompactionReason::SegmentCount);
    assert_eq!(plan.generations(), vec![5, 4, 3, 2, 1]);
    assert!(plan.drop_tombstones);
}

#[test]
fn test_run_length_bounded_to_newest_segments() {
    let (_temp, storage) = setup_temp_storage();
    let mut live = Vec::new();
    for i in 0..6u64 {
        push_segment(&storage, &mut live, vec![Record::put(format!("k{}", i), "v", i + 1)]);
    }

    let plan = CompactionPolicy::new(4, 0.5, 3).pick(&live).unwrap();

    assert_eq!(plan.generations(), vec![6, 5, 4]);
    assert!(!plan.drop_tombstones);
    assert!(plan.contains(5));
    assert!(!plan.contains(1));
}

#[test]
fn test_tombstone_ratio_trigger() {
    let (_temp, storage) = setup_temp_storage();
    let mut live = Vec::new();
    push_segment(&storage, &mut live, vec![Record::put("a", "1", 1), Record::put("b", "2", 2)]);
    push_segment(
        &storage,
        &mut live,
        vec![Record::tombstone("a", 3), Record::tombstone("b", 4), Record::tombstone("c", 5)],
    );

    let plan = CompactionPolicy::new(4, 0.5, 16).pick(&live).unwrap();

    assert_eq!(plan.reason, CompactionReason::TombstoneRatio);
    assert_eq!(plan.inputs.len(), 2);
    assert!(plan.drop_tombstones);

    assert!(CompactionPolicy::new(4, 0.9, 16).pick(&live).is_none());
}

#[test]
fn test_policy_from_config() {
    let config = Config::builder()
        .compaction_segment_threshold(1)
        .compaction_tombstone_ratio(1.0)
        .max_compaction_run(2)
        .build();
    let (_temp, storage) = setup_temp_storage();
    let mut live = Vec::new();
    for i in 0..3u64 {
        push_segment(&storage, &mut live, vec![Record::put("k", format!("v{}", i), i + 1)]);
    }

    let plan = CompactionPolicy::from_config(&config).pick(&live).unwrap();

    assert_eq!(plan.generations(), vec![3, 2]);
}

#[test]
fn test_manual_plan() {
    let (_temp, storage) = setup_temp_storage();
    let mut live = Vec::new();
    assert!(CompactionPolicy::manual(&live).is_none());

    push_segment(&storage, &mut live, vec![Record::put("a", "1", 1)]);
    let plan = CompactionPolicy::manual(&live).unwrap();

    assert_eq!(plan.reason, CompactionReason::Manual);
    assert_eq!(plan.generations(), vec![1]);
    assert!(plan.drop_tombstones);
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_compact_keeps_newest_version_and_drops_tombstones() {
    let (_temp, storage) = setup_temp_storage();
    let mut live = Vec::new();
    push_segment(
        &storage,
        &mut live,
        vec![Record::put("a", "a1", 1), Record::put("b", "b1", 2), Record::put("c", "c1", 3)],
    );
    push_segment(&storage, &mut live, vec![Record::put("a", "a2", 4), Record::tombstone("b", 5)]);

    let plan = CompactionPolicy::manual(&live).unwrap();
    let outcome = compaction::compact(&storage, &plan, &not_cancelled()).unwrap();

    assert_eq!(
        contents(&outcome.output),
        vec![Record::put("a", "a2", 4), Record::put("c", "c1", 3)]
    );
    assert_eq!(outcome.records_in, 5);
    assert_eq!(outcome.tombstones_dropped, 1);
    assert_eq!(outcome.output.generation(), 3);
    assert_eq!(outcome.output.meta().covers_from, 1);
    assert_eq!(outcome.output.meta().max_seq, 4);
}

#[test]
fn test_partial_run_keeps_tombstones() {
    let (_temp, storage) = setup_temp_storage();
    let mut live = Vec::new();
    push_segment(&storage, &mut live, vec![Record::put("k", "oldest", 1)]);
    push_segment(&storage, &mut live, vec![Record::tombstone("k", 2)]);
    push_segment(&storage, &mut live, vec![Record::put("other", "v", 3)]);
    push_segment(&storage, &mut live, vec![Record::put("more", "v", 4)]);
    push_segment(&storage, &mut live, vec![Record::put("most", "v", 5)]);

    let plan = CompactionPolicy::new(4, 1.0, 4).pick(&live).unwrap();
    assert_eq!(plan.generations(), vec![5, 4, 3, 2]);
    assert!(!plan.drop_tombstones);

    let outcome = compaction::compact(&storage, &plan, &not_cancelled()).unwrap();

    let output = contents(&outcome.output);
    assert!(output.contains(&Record::tombstone("k", 2)));
    assert_eq!(outcome.tombstones_dropped, 0);
    assert_eq!(outcome.output.meta().covers_from, 2);
    // The surviving oldest segment is not covered by the output
    assert!(!outcome.output.meta().supersedes(1));
}

#[test]
fn test_compact_everything_deleted_yields_empty_output() {
    let (_temp, storage) = setup_temp_storage();
    let mut live = Vec::new();
    push_segment(&storage, &mut live, vec![Record::put("a", "1", 1)]);
    push_segment(&storage, &mut live, vec![Record::tombstone("a", 2)]);

    let plan = CompactionPolicy::manual(&live).unwrap();
    let outcome = compaction::compact(&storage, &plan, &not_cancelled()).unwrap();

    assert_eq!(outcome.output.record_count(), 0);
    assert!(outcome.output.path().exists());
    assert!(outcome.output.meta().supersedes(1));
    assert!(outcome.output.meta().supersedes(2));
    // The purged tombstone's sequence number is still accounted for
    assert_eq!(outcome.output.meta().max_seq, 2);
}

#[test]
fn test_recompacting_is_idempotent() {
    let (_temp, storage) = setup_temp_storage();
    let mut live = Vec::new();
    push_segment(&storage, &mut live, vec![Record::put("a", "1", 1), Record::put("b", "2", 2)]);
    push_segment(&storage, &mut live, vec![Record::put("b", "3", 3)]);

    let first = compaction::compact(&storage, &CompactionPolicy::manual(&live).unwrap(), &not_cancelled())
        .unwrap();
    let once = contents(&first.output);
    let second = compaction::compact(
        &storage,
        &CompactionPolicy::manual(&[Arc::clone(&first.output)]).unwrap(),
        &not_cancelled(),
    )
    .unwrap();

    assert_eq!(contents(&second.output), once);
}

#[test]
fn test_cancelled_compaction_leaves_no_output() {
    let (temp, storage) = setup_temp_storage();
    let mut live = Vec::new();
    push_segment(&storage, &mut live, vec![Record::put("a", "1", 1)]);
    push_segment(&storage, &mut live, vec![Record::put("b", "2", 2)]);

    let plan = CompactionPolicy::manual(&live).unwrap();
    let result = compaction::compact(&storage, &plan, &AtomicBool::new(true));

    assert!(matches!(result, Err(StrataError::Closed)));
    let files = std::fs::read_dir(temp.path().join("segments")).unwrap().count();
    assert_eq!(files, 2);
}
