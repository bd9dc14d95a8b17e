//! Tests for WAL Recovery
//!
//! These tests verify:
//! - Full replay of a clean log
//! - Truncation of a torn tail (and that appends resume cleanly after it)
//! - Refusal to recover past mid-log corruption
//! - Verification without modification

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use strata::config::WalSyncStrategy;
use strata::record::Value;
use strata::wal::{self, RecoveryResult, WalRecovery, WalWriter};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = wal::wal_path(temp_dir.path(), 1);
    (temp_dir, wal_path)
}

fn write_entries(path: &PathBuf, seqs: std::ops::RangeInclusive<u64>) {
    let mut writer = WalWriter::open(path, WalSyncStrategy::EveryWrite).unwrap();
    for seq in seqs {
        writer
            .append(seq, format!("key{}", seq).as_bytes(), &Value::Put(b"value".to_vec()))
            .unwrap();
    }
}

fn append_garbage(path: &PathBuf) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(&[0x5A; 11]).unwrap();
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_recover_clean_log() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 1..=10);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(entries.len(), 10);
    assert_eq!(
        result,
        RecoveryResult {
            entries_recovered: 10,
            entries_corrupted: 0,
            last_seq: 10,
            was_truncated: false,
        }
    );
}

#[test]
fn test_recover_empty_log() {
    let (_temp, wal_path) = setup_temp_wal();
    std::fs::File::create(&wal_path).unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert!(entries.is_empty());
    assert_eq!(result, RecoveryResult::default());
}

#[test]
fn test_recover_truncates_torn_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 1..=4);
    let good_len = std::fs::metadata(&wal_path).unwrap().len();
    append_garbage(&wal_path);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(entries.len(), 4);
    assert_eq!(result.last_seq, 4);
    assert_eq!(result.entries_corrupted, 1);
    assert!(result.was_truncated);
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), good_len);
}

#[test]
fn test_append_after_truncation_is_readable() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 1..=2);
    append_garbage(&wal_path);
    WalRecovery::recover(&wal_path).unwrap();

    write_entries(&wal_path, 3..=3);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(entries.len(), 3);
    assert!(!result.was_truncated);
}

#[test]
fn test_replay_visits_entries_in_order() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 5..=9);

    let mut seen = Vec::new();
    WalRecovery::replay(&wal_path, |entry| {
        seen.push(entry.seq);
        Ok(())
    })
    .unwrap();

    assert_eq!(seen, vec![5, 6, 7, 8, 9]);
}

#[test]
fn test_recover_fails_on_mid_log_corruption() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 1..=3);
    let mut data = std::fs::read(&wal_path).unwrap();
    data[20] ^= 0xFF;
    std::fs::write(&wal_path, &data).unwrap();

    let err = WalRecovery::recover(&wal_path).unwrap_err();

    assert!(err.is_corruption());
    assert_eq!(std::fs::read(&wal_path).unwrap(), data);
}

#[test]
fn test_recover_fails_on_damaged_length_of_first_entry() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 1..=5);
    let mut data = std::fs::read(&wal_path).unwrap();
    // High byte of the first frame's length field
    data[15] = 0x7F;
    std::fs::write(&wal_path, &data).unwrap();

    let err = WalRecovery::recover(&wal_path).unwrap_err();

    assert!(err.is_corruption());
    assert_eq!(std::fs::read(&wal_path).unwrap(), data);
}

#[test]
fn test_recover_truncates_partially_written_last_entry() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 1..=3);
    let full_len = std::fs::metadata(&wal_path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
    file.set_len(full_len - 3).unwrap();
    drop(file);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(entries.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(result.last_seq, 2);
    assert!(result.was_truncated);
    assert!(std::fs::metadata(&wal_path).unwrap().len() < full_len - 3);
}

#[test]
fn test_verify_does_not_modify() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 1..=3);
    append_garbage(&wal_path);
    let len_before = std::fs::metadata(&wal_path).unwrap().len();

    let result = WalRecovery::verify(&wal_path).unwrap();

    assert!(result.was_truncated);
    assert_eq!(result.entries_recovered, 3);
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), len_before);
}

// =============================================================================
// File Naming Tests
// =============================================================================

#[test]
fn test_list_wal_files_sorted_by_id() {
    let temp_dir = TempDir::new().unwrap();
    for id in [3u64, 1, 12] {
        std::fs::File::create(wal::wal_path(temp_dir.path(), id)).unwrap();
    }
    std::fs::File::create(temp_dir.path().join("notes.txt")).unwrap();

    let ids: Vec<u64> = wal::list_wal_files(temp_dir.path())
        .unwrap()
        .into_iter()
        .map(|(id, _)| id)
        .collect();

    assert_eq!(ids, vec![1, 3, 12]);
    assert_eq!(wal::parse_wal_id(&wal::wal_path(temp_dir.path(), 42)), Some(42));
}
