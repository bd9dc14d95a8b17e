//! Tests for WAL Entry framing
//!
//! These tests verify:
//! - Frame encoding/decoding for puts and tombstones
//! - Checksum coverage of header and payload
//! - Rejection of short and mis-sized frames

use strata::record::Value;
use strata::wal::{WalEntry, HEADER_SIZE};
use strata::StrataError;

#[test]
fn test_serialize_deserialize_put() {
    let entry = WalEntry::new(7, b"key1".to_vec(), Value::Put(b"value1".to_vec()));

    let bytes = entry.serialize().unwrap();
    let decoded = WalEntry::deserialize(&bytes).unwrap();

    assert_eq!(decoded, entry);
    assert_eq!(decoded.seq, 7);
}

#[test]
fn test_serialize_deserialize_tombstone() {
    let entry = WalEntry::new(42, b"gone".to_vec(), Value::Tombstone);

    let decoded = WalEntry::deserialize(&entry.serialize().unwrap()).unwrap();

    assert!(decoded.value.is_tombstone());
    assert_eq!(decoded.key, b"gone");
}

#[test]
fn test_empty_key_and_value() {
    let entry = WalEntry::new(1, Vec::new(), Value::Put(Vec::new()));

    let decoded = WalEntry::deserialize(&entry.serialize().unwrap()).unwrap();

    assert_eq!(decoded, entry);
}

#[test]
fn test_header_layout() {
    let entry = WalEntry::new(0x0102_0304_0506_0708, b"k".to_vec(), Value::Put(b"v".to_vec()));
    let bytes = entry.serialize().unwrap();

    assert_eq!(&bytes[0..8], &0x0102_0304_0506_0708u64.to_le_bytes());
    let len = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
    assert_eq!(bytes.len(), HEADER_SIZE + len as usize);
}

#[test]
fn test_payload_corruption_detected() {
    let entry = WalEntry::new(3, b"key".to_vec(), Value::Put(b"value".to_vec()));
    let mut bytes = entry.serialize().unwrap();

    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let err = WalEntry::deserialize(&bytes).unwrap_err();
    assert!(matches!(err, StrataError::Corruption(_)));
}

#[test]
fn test_sequence_corruption_detected() {
    let entry = WalEntry::new(3, b"key".to_vec(), Value::Put(b"value".to_vec()));
    let mut bytes = entry.serialize().unwrap();

    bytes[0] ^= 0x01;

    assert!(WalEntry::deserialize(&bytes).unwrap_err().is_corruption());
}

#[test]
fn test_truncated_frame() {
    let entry = WalEntry::new(3, b"key".to_vec(), Value::Put(b"value".to_vec()));
    let bytes = entry.serialize().unwrap();

    let err = WalEntry::deserialize(&bytes[..bytes.len() - 2]).unwrap_err();
    assert!(matches!(err, StrataError::Corruption(_)));
}

#[test]
fn test_frame_shorter_than_header() {
    let err = WalEntry::deserialize(&[0u8; HEADER_SIZE - 1]).unwrap_err();
    assert!(matches!(err, StrataError::Corruption(_)));

    assert!(WalEntry::deserialize(&[]).is_err());
}

#[test]
fn test_large_value() {
    let value = vec![0xAB; 1024 * 1024];
    let entry = WalEntry::new(9, b"big".to_vec(), Value::Put(value.clone()));

    let decoded = WalEntry::deserialize(&entry.serialize().unwrap()).unwrap();

    assert_eq!(decoded.value, Value::Put(value));
}

#[test]
fn test_into_record_keeps_sequence() {
    let record = WalEntry::new(11, b"k".to_vec(), Value::Tombstone).into_record();

    assert_eq!(record.seq, 11);
    assert_eq!(record.key, b"k");
    assert!(record.value.is_tombstone());
}
