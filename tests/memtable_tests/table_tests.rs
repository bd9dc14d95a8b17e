//! Tests for MemTable
//!
//! These tests verify:
//! - Put/get/delete with sequence numbers
//! - Tombstones are entries, not absence
//! - Size tracking for flush triggers
//! - Ordered, bounded, lazy iteration
//! - Lifecycle state transitions
//! - Concurrent readers alongside a writer

use std::ops::Bound;
use std::sync::Arc;
use std::thread;

use strata::memtable::{MemTable, MemTableEntry, MemTableState};
use strata::record::{Record, Value};

fn keys(records: impl Iterator<Item = Record>) -> Vec<Vec<u8>> {
    records.map(|r| r.key).collect()
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_new_memtable_is_empty() {
    let memtable = MemTable::new();

    assert!(memtable.is_empty());
    assert_eq!(memtable.entry_count(), 0);
    assert_eq!(memtable.size(), 0);
    assert_eq!(memtable.max_seq(), 0);
}

#[test]
fn test_put_and_get() {
    let memtable = MemTable::new();

    memtable.put(b"key1".to_vec(), b"value1".to_vec(), 1);

    assert_eq!(
        memtable.get(b"key1"),
        Some(MemTableEntry {
            value: Value::Put(b"value1".to_vec()),
            seq: 1,
        })
    );
    assert_eq!(memtable.get(b"missing"), None);
}

#[test]
fn test_put_overwrites_existing() {
    let memtable = MemTable::new();

    memtable.put(b"key".to_vec(), b"old".to_vec(), 1);
    memtable.put(b"key".to_vec(), b"new".to_vec(), 2);

    let entry = memtable.get(b"key").unwrap();
    assert_eq!(entry.value, Value::Put(b"new".to_vec()));
    assert_eq!(entry.seq, 2);
    assert_eq!(memtable.entry_count(), 1);
    assert_eq!(memtable.max_seq(), 2);
}

// =============================================================================
// Delete / Tombstone Tests
// =============================================================================

#[test]
fn test_delete_creates_tombstone() {
    let memtable = MemTable::new();

    memtable.put(b"key".to_vec(), b"value".to_vec(), 1);
    memtable.delete(b"key".to_vec(), 2);

    let entry = memtable.get(b"key").unwrap();
    assert!(entry.value.is_tombstone());
    assert_eq!(entry.seq, 2);
}

#[test]
fn test_delete_nonexistent_key_still_records_tombstone() {
    let memtable = MemTable::new();

    memtable.delete(b"ghost".to_vec(), 5);

    assert!(memtable.get(b"ghost").unwrap().value.is_tombstone());
    assert_eq!(memtable.entry_count(), 1);
}

#[test]
fn test_put_after_delete() {
    let memtable = MemTable::new();

    memtable.delete(b"key".to_vec(), 1);
    memtable.put(b"key".to_vec(), b"back".to_vec(), 2);

    assert_eq!(memtable.get(b"key").unwrap().value.as_bytes(), Some(&b"back"[..]));
}

// =============================================================================
// Size Tracking Tests
// =============================================================================

#[test]
fn test_size_grows_with_entries() {
    let memtable = MemTable::new();

    let after_one = memtable.put(b"key".to_vec(), b"value".to_vec(), 1);
    let after_two = memtable.put(b"other".to_vec(), b"value".to_vec(), 2);

    assert!(after_one >= 8);
    assert!(after_two > after_one);
    assert_eq!(memtable.size(), after_two);
}

#[test]
fn test_size_tracks_overwrite() {
    let memtable = MemTable::new();

    let small = memtable.put(b"key".to_vec(), b"v".to_vec(), 1);
    let large = memtable.put(b"key".to_vec(), vec![0u8; 100], 2);
    let back = memtable.put(b"key".to_vec(), b"v".to_vec(), 3);

    assert_eq!(large - small, 99);
    assert_eq!(back, small);
}

#[test]
fn test_delete_shrinks_value_size() {
    let memtable = MemTable::new();

    let with_value = memtable.put(b"key".to_vec(), vec![0u8; 50], 1);
    let with_tombstone = memtable.delete(b"key".to_vec(), 2);

    assert_eq!(with_value - with_tombstone, 50);
}

#[test]
fn test_should_flush() {
    let memtable = MemTable::new();
    let size = memtable.put(b"key".to_vec(), b"value".to_vec(), 1);

    assert!(!memtable.should_flush(size + 1));
    assert!(memtable.should_flush(size));
    assert!(memtable.should_flush(1));
}

// =============================================================================
// Iteration Tests
// =============================================================================

#[test]
fn test_iter_sorted_order() {
    let memtable = Arc::new(MemTable::new());
    for (seq, key) in [b"delta", b"alpha", b"charl", b"bravo"].iter().enumerate() {
        memtable.put(key.to_vec(), b"v".to_vec(), seq as u64 + 1);
    }

    assert_eq!(
        keys(memtable.iter()),
        vec![b"alpha".to_vec(), b"bravo".to_vec(), b"charl".to_vec(), b"delta".to_vec()]
    );
}

#[test]
fn test_iter_includes_tombstones() {
    let memtable = Arc::new(MemTable::new());
    memtable.put(b"a".to_vec(), b"1".to_vec(), 1);
    memtable.delete(b"b".to_vec(), 2);

    let records: Vec<Record> = memtable.iter().collect();

    assert_eq!(records, vec![Record::put("a", "1", 1), Record::tombstone("b", 2)]);
}

#[test]
fn test_range_bounds() {
    let memtable = Arc::new(MemTable::new());
    for (i, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        memtable.put(key.as_bytes().to_vec(), b"v".to_vec(), i as u64 + 1);
    }

    let inclusive = memtable.range(Bound::Included(b"b".to_vec()), Bound::Included(b"d".to_vec()));
    assert_eq!(keys(inclusive), vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

    let exclusive = memtable.range(Bound::Excluded(b"b".to_vec()), Bound::Excluded(b"d".to_vec()));
    assert_eq!(keys(exclusive), vec![b"c".to_vec()]);

    let open_start = memtable.range(Bound::Unbounded, Bound::Included(b"b".to_vec()));
    assert_eq!(keys(open_start), vec![b"a".to_vec(), b"b".to_vec()]);
}

#[test]
fn test_inverted_range_is_empty() {
    let memtable = Arc::new(MemTable::new());
    memtable.put(b"m".to_vec(), b"v".to_vec(), 1);

    let inverted = memtable.range(Bound::Included(b"z".to_vec()), Bound::Included(b"a".to_vec()));
    assert_eq!(inverted.count(), 0);

    let same_excluded = memtable.range(Bound::Excluded(b"m".to_vec()), Bound::Excluded(b"m".to_vec()));
    assert_eq!(same_excluded.count(), 0);
}

#[test]
fn test_iterator_sees_later_writes_ahead_of_cursor() {
    let memtable = Arc::new(MemTable::new());
    memtable.put(b"a".to_vec(), b"1".to_vec(), 1);
    memtable.put(b"c".to_vec(), b"3".to_vec(), 2);

    let mut iter = memtable.iter();
    assert_eq!(iter.next().unwrap().key, b"a");
    memtable.put(b"b".to_vec(), b"2".to_vec(), 3);

    assert_eq!(keys(iter), vec![b"b".to_vec(), b"c".to_vec()]);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_wal_id_and_initial_state() {
    let memtable = MemTable::with_wal_id(17);

    assert_eq!(memtable.wal_id(), 17);
    assert_eq!(memtable.state(), MemTableState::Active);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_readers_with_writer() {
    let memtable = Arc::new(MemTable::new());
    for i in 0..100u64 {
        memtable.put(format!("key{:03}", i).into_bytes(), b"v".to_vec(), i + 1);
    }

    let writer = {
        let memtable = Arc::clone(&memtable);
        thread::spawn(move || {
            for i in 100..200u64 {
                memtable.put(format!("key{:03}", i).into_bytes(), b"v".to_vec(), i + 1);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let memtable = Arc::clone(&memtable);
            thread::spawn(move || {
                for i in 0..100u64 {
                    assert!(memtable.get(format!("key{:03}", i).as_bytes()).is_some());
                }
                let seen: Vec<Vec<u8>> = memtable.iter().map(|r| r.key).collect();
                assert!(seen.windows(2).all(|w| w[0] < w[1]));
                assert!(seen.len() >= 100);
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(memtable.entry_count(), 200);
    assert_eq!(memtable.max_seq(), 200);
}
