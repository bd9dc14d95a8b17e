//! Segment Builder
//!
//! Writes sorted records to a new segment file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};

use crate::error::{Result, StrataError};
use crate::record::Record;

use super::{encode_record, SegmentMeta, HEADER_SIZE, MAGIC, VERSION};

/// Builder for creating new segments from sorted records
///
/// The builder writes wherever it is pointed; publishing (temp file + rename)
/// is the storage manager's job.
pub struct SegmentBuilder {
    /// Output file path
    path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    generation: u64,
    covers_from: u64,
    /// One index entry every `index_interval` records
    index_interval: usize,
    /// Current write position (for index)
    current_offset: u64,
    /// Sparse index: sampled key → file offset of record
    index: Vec<(Vec<u8>, u64)>,
    record_count: u64,
    tombstone_count: u64,
    /// Track min/max keys for metadata
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
    max_seq: u64,
    /// Reused framing buffer
    scratch: BytesMut,
}

impl SegmentBuilder {
    /// Create a new segment builder
    ///
    /// Writes the header immediately; call `add()` in strictly ascending key
    /// order, then `finish()` to write index, meta block and footer.
    pub fn new(path: &Path, generation: u64, index_interval: usize) -> Result<Self> {
        if index_interval == 0 {
            return Err(StrataError::InvalidInput(
                "index interval must be at least 1".to_string(),
            ));
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&generation.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            generation,
            covers_from: generation,
            index_interval,
            current_offset: HEADER_SIZE,
            index: Vec::new(),
            record_count: 0,
            tombstone_count: 0,
            min_key: None,
            max_key: None,
            max_seq: 0,
            scratch: BytesMut::new(),
        })
    }

    /// Record that this segment replaces every generation from `generation`
    /// up to its own (compaction output)
    pub fn covers_from(mut self, generation: u64) -> Self {
        self.covers_from = generation.min(self.generation);
        self
    }

    /// Never report a `max_seq` below `seq`, even if the records that carried
    /// it were dropped (compaction purging tombstones)
    pub fn max_seq_floor(mut self, seq: u64) -> Self {
        self.max_seq = self.max_seq.max(seq);
        self
    }

    /// Add a record (keys must be strictly ascending)
    pub fn add(&mut self, record: &Record) -> Result<()> {
        if let Some(last) = &self.max_key {
            if record.key.as_slice() <= last.as_slice() {
                return Err(StrataError::InvalidInput(format!(
                    "segment keys out of order: {:?} after {:?}",
                    String::from_utf8_lossy(&record.key),
                    String::from_utf8_lossy(last)
                )));
            }
        }

        if self.record_count % self.index_interval as u64 == 0 {
            self.index.push((record.key.clone(), self.current_offset));
        }

        self.scratch.clear();
        encode_record(&mut self.scratch, record)?;
        self.writer.write_all(&self.scratch)?;
        self.current_offset += self.scratch.len() as u64;

        if self.min_key.is_none() {
            self.min_key = Some(record.key.clone());
        }
        self.max_key = Some(record.key.clone());
        self.max_seq = self.max_seq.max(record.seq);
        self.record_count += 1;
        if record.value.is_tombstone() {
            self.tombstone_count += 1;
        }

        Ok(())
    }

    /// Number of records added so far
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Finish building: write index block, meta block, footer; fsync; return metadata
    pub fn finish(mut self) -> Result<SegmentMeta> {
        let index_offset = self.current_offset;
        let mut tail = BytesMut::new();

        // Index block: [key_len(4)][offset(8)][key] per sampled record
        for (key, offset) in &self.index {
            tail.put_u32_le(key.len() as u32);
            tail.put_u64_le(*offset);
            tail.put_slice(key);
        }

        // Meta block: [min_len(4)][min_key][max_len(4)][max_key]
        let meta_offset = index_offset + tail.len() as u64;
        let min_key = self.min_key.take().unwrap_or_default();
        let max_key = self.max_key.take().unwrap_or_default();
        tail.put_u32_le(min_key.len() as u32);
        tail.put_slice(&min_key);
        tail.put_u32_le(max_key.len() as u32);
        tail.put_slice(&max_key);

        // Footer fields, then CRC over index + meta + fields
        tail.put_u64_le(index_offset);
        tail.put_u64_le(meta_offset);
        tail.put_u64_le(self.record_count);
        tail.put_u64_le(self.tombstone_count);
        tail.put_u64_le(self.max_seq);
        tail.put_u64_le(self.covers_from);
        let crc = crc32fast::hash(&tail);
        tail.put_u32_le(crc);
        tail.put_u32_le(0); // Padding for alignment

        self.writer.write_all(&tail)?;
        self.writer.flush()?;

        let file = self.writer.into_inner().map_err(|e| {
            StrataError::Io(std::io::Error::new(
                e.error().kind(),
                format!("Failed to flush segment: {}", e.error()),
            ))
        })?;
        file.sync_all()?;
        let file_size = file.metadata()?.len();

        Ok(SegmentMeta {
            path: self.path,
            generation: self.generation,
            covers_from: self.covers_from,
            record_count: self.record_count,
            tombstone_count: self.tombstone_count,
            min_key,
            max_key,
            max_seq: self.max_seq,
            file_size,
        })
    }
}
