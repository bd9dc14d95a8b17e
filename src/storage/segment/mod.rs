//! Segment Module
//!
//! Sorted String Table - immutable on-disk sorted key/value records.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                            │
//! │   Magic: "STRA" (4) | Version: u16 (2) | Generation: u64 (8) │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                        │
//! │   [CRC u32][Seq u64][Kind u8][KeyLen u32][ValLen u32]        │
//! │   [Key][Value]                                               │
//! │   ... repeated for each record, ascending key order ...      │
//! │   (Kind 1 = tombstone, ValLen = 0)                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Index Block (variable, one entry every N records)            │
//! │   [KeyLen u32][Offset u64][Key]                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Meta Block (variable)                                        │
//! │   [MinLen u32][MinKey][MaxLen u32][MaxKey]                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer (56 bytes)                                            │
//! │   IndexOffset u64 | MetaOffset u64 | RecordCount u64 |       │
//! │   TombstoneCount u64 | MaxSeq u64 | CoversFrom u64 |         │
//! │   CRC u32 | Padding u32                                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every record carries its own CRC (over everything after the CRC field),
//! so the data block can be walked sequentially without the index. The
//! footer CRC covers the index block, the meta block and the footer fields.
//!
//! `CoversFrom` is the lowest generation folded into this segment: a flush
//! covers only its own generation, a compaction output covers every
//! generation from its oldest input up to its own. Any other segment whose
//! generation falls inside that range is superseded.

mod builder;
mod iterator;
mod reader;

use std::io::Read;
use std::path::PathBuf;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, StrataError};
use crate::record::{Record, Value};

pub use builder::SegmentBuilder;
pub use iterator::SegmentIterator;
pub use reader::SegmentReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes identifying a Strata segment file
pub(crate) const MAGIC: &[u8; 4] = b"STRA";

/// Current segment format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Generation (8) = 14 bytes
pub(crate) const HEADER_SIZE: u64 = 14;

/// Footer size: six u64 fields + CRC (4) + Padding (4) = 56 bytes
pub(crate) const FOOTER_SIZE: u64 = 56;

/// Record header: CRC (4) + Seq (8) + Kind (1) + KeyLen (4) + ValLen (4)
pub(crate) const RECORD_HEADER_SIZE: usize = 21;

const KIND_PUT: u8 = 0;
const KIND_TOMBSTONE: u8 = 1;

// =============================================================================
// Segment Metadata
// =============================================================================

/// Summary of a sealed segment, as recorded in its meta block and footer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMeta {
    /// Path to the segment file
    pub path: PathBuf,
    /// Generation number (higher = newer)
    pub generation: u64,
    /// Lowest generation folded into this segment
    pub covers_from: u64,
    /// Number of records, tombstones included
    pub record_count: u64,
    /// Number of tombstone records
    pub tombstone_count: u64,
    /// Smallest key (empty for an empty segment)
    pub min_key: Vec<u8>,
    /// Largest key (empty for an empty segment)
    pub max_key: Vec<u8>,
    /// Highest sequence number stored (0 for an empty segment)
    pub max_seq: u64,
    /// File size in bytes
    pub file_size: u64,
}

impl SegmentMeta {
    /// Get the number of records
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Quick check if a key might be in this segment (range check)
    /// Returns false if key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.record_count > 0 && key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }

    /// Whether this segment's key range intersects the inclusive range
    pub fn overlaps(&self, low: &[u8], high: &[u8]) -> bool {
        self.record_count > 0 && low <= self.max_key.as_slice() && high >= self.min_key.as_slice()
    }

    /// True when `generation` was folded into this segment
    pub fn supersedes(&self, generation: u64) -> bool {
        generation >= self.covers_from && generation < self.generation
    }
}

// =============================================================================
// Record Framing
// =============================================================================

/// Append one framed record to `out`
pub(crate) fn encode_record(out: &mut BytesMut, record: &Record) -> Result<()> {
    let key_len = u32::try_from(record.key.len())
        .map_err(|_| StrataError::InvalidInput(format!("key too large: {} bytes", record.key.len())))?;
    let val_len = u32::try_from(record.value.len()).map_err(|_| {
        StrataError::InvalidInput(format!("value too large: {} bytes", record.value.len()))
    })?;
    let kind = match record.value {
        Value::Put(_) => KIND_PUT,
        Value::Tombstone => KIND_TOMBSTONE,
    };

    let body_len = RECORD_HEADER_SIZE - 4 + record.key.len() + record.value.len();
    let mut body = BytesMut::with_capacity(body_len);
    body.put_u64_le(record.seq);
    body.put_u8(kind);
    body.put_u32_le(key_len);
    body.put_u32_le(val_len);
    body.put_slice(&record.key);
    if let Some(value) = record.value.as_bytes() {
        body.put_slice(value);
    }

    out.reserve(4 + body.len());
    out.put_u32_le(crc32fast::hash(&body));
    out.put_slice(&body);
    Ok(())
}

/// Read one framed record at `offset`; the data block ends at `end`.
/// Returns the record and its encoded length.
pub(crate) fn read_record<R: Read>(reader: &mut R, offset: u64, end: u64) -> Result<(Record, u64)> {
    if offset + RECORD_HEADER_SIZE as u64 > end {
        return Err(StrataError::Corruption(format!(
            "truncated record header at offset {}",
            offset
        )));
    }
    let mut header = [0u8; RECORD_HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let mut buf = &header[..];
    let crc = buf.get_u32_le();
    let seq = buf.get_u64_le();
    let kind = buf.get_u8();
    let key_len = buf.get_u32_le() as usize;
    let val_len = buf.get_u32_le() as usize;

    if kind == KIND_TOMBSTONE && val_len != 0 {
        return Err(StrataError::Corruption(format!(
            "tombstone with {} value bytes at offset {}",
            val_len, offset
        )));
    }

    let len = (RECORD_HEADER_SIZE + key_len + val_len) as u64;
    if offset + len > end {
        return Err(StrataError::Corruption(format!(
            "record at offset {} overruns the data block",
            offset
        )));
    }

    let mut body = vec![0u8; key_len + val_len];
    reader.read_exact(&mut body)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header[4..]);
    hasher.update(&body);
    if hasher.finalize() != crc {
        return Err(StrataError::Corruption(format!(
            "segment record checksum mismatch at offset {}",
            offset
        )));
    }

    let value = match kind {
        KIND_PUT => Value::Put(body.split_off(key_len)),
        KIND_TOMBSTONE => Value::Tombstone,
        other => {
            return Err(StrataError::Corruption(format!(
                "unknown record kind {} at offset {}",
                other, offset
            )))
        }
    };

    Ok((Record::new(body, value, seq), len))
}
