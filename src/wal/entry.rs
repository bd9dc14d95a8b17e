//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and their framing.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::record::{Record, Value};

/// Frame header size: Seq (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Sequence number assigned by the engine
    pub seq: u64,

    /// Key written
    pub key: Vec<u8>,

    /// Value or tombstone written
    pub value: Value,
}

/// Borrowed payload, serialized without copying key or value
#[derive(Serialize)]
struct PayloadRef<'a> {
    key: &'a [u8],
    value: &'a Value,
}

#[derive(Deserialize)]
struct Payload {
    key: Vec<u8>,
    value: Value,
}

impl WalEntry {
    pub fn new(seq: u64, key: impl Into<Vec<u8>>, value: Value) -> Self {
        Self {
            seq,
            key: key.into(),
            value,
        }
    }

    /// Encode this entry as a complete frame
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode_frame(self.seq, &self.key, &self.value)
    }

    /// Decode one complete frame, verifying its checksum
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StrataError::Corruption(format!(
                "WAL frame too short: {} bytes",
                bytes.len()
            )));
        }
        let (seq, crc, len) = parse_header(&bytes[..HEADER_SIZE]);
        let payload = &bytes[HEADER_SIZE..];
        if payload.len() != len as usize {
            return Err(StrataError::Corruption(format!(
                "WAL frame length mismatch: header says {}, got {}",
                len,
                payload.len()
            )));
        }
        if checksum(seq, len, payload) != crc {
            return Err(StrataError::Corruption(format!(
                "WAL checksum mismatch for seq {}",
                seq
            )));
        }
        decode_payload(seq, payload)
    }

    pub fn into_record(self) -> Record {
        Record::new(self.key, self.value, self.seq)
    }
}

/// Encode a frame straight from borrowed parts (the writer's hot path)
pub(crate) fn encode_frame(seq: u64, key: &[u8], value: &Value) -> Result<Vec<u8>> {
    let payload = bincode::serialize(&PayloadRef { key, value })?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        StrataError::InvalidInput(format!("WAL entry too large: {} bytes", payload.len()))
    })?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&seq.to_le_bytes());
    frame.extend_from_slice(&checksum(seq, len, &payload).to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Split a frame header into (seq, crc, len)
pub(crate) fn parse_header(header: &[u8]) -> (u64, u32, u32) {
    let mut seq = [0u8; 8];
    let mut crc = [0u8; 4];
    let mut len = [0u8; 4];
    seq.copy_from_slice(&header[0..8]);
    crc.copy_from_slice(&header[8..12]);
    len.copy_from_slice(&header[12..16]);
    (
        u64::from_le_bytes(seq),
        u32::from_le_bytes(crc),
        u32::from_le_bytes(len),
    )
}

pub(crate) fn checksum(seq: u64, len: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&seq.to_le_bytes());
    hasher.update(&len.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

pub(crate) fn decode_payload(seq: u64, payload: &[u8]) -> Result<WalEntry> {
    let decoded: Payload = bincode::deserialize(payload).map_err(|e| {
        StrataError::Corruption(format!("undecodable WAL payload for seq {}: {}", seq, e))
    })?;
    Ok(WalEntry {
        seq,
        key: decoded.key,
        value: decoded.value,
    })
}
