//! Segment Reader
//!
//! Opens segment files and serves point lookups through the sparse index.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Buf;
use parking_lot::Mutex;

use crate::error::{Result, StrataError};
use crate::record::Record;

use super::iterator::SegmentIterator;
use super::{read_record, SegmentMeta, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};

/// Reader for one sealed segment
///
/// Point lookups share one buffered handle behind a mutex; range iterators
/// open their own handle. The file is never written through a reader.
///
/// A reader marked obsolete (retired by compaction) unlinks its file when
/// the last `Arc` to it is dropped, so in-flight reads keep working.
pub struct SegmentReader {
    meta: SegmentMeta,
    /// Sparse index: sampled key → record offset, ascending
    index: Vec<(Vec<u8>, u64)>,
    /// End of the data block (start of the index block)
    data_end: u64,
    file: Mutex<BufReader<File>>,
    obsolete: AtomicBool,
}

impl SegmentReader {
    /// Open a segment for reading
    ///
    /// Validates header and footer checksum, then loads the sparse index and
    /// key range into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(StrataError::Corruption(format!(
                "segment {} too small: {} bytes",
                path.display(),
                file_size
            )));
        }

        // Read and validate header
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        let mut buf = &header[..];
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err(StrataError::Corruption(format!(
                "invalid segment magic in {}: {:?}",
                path.display(),
                magic
            )));
        }
        let version = buf.get_u16_le();
        if version != VERSION {
            return Err(StrataError::Corruption(format!(
                "unsupported segment version {} in {}",
                version,
                path.display()
            )));
        }
        let generation = buf.get_u64_le();

        // Read footer
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;
        let mut buf = &footer[..];
        let index_offset = buf.get_u64_le();
        let meta_offset = buf.get_u64_le();
        let record_count = buf.get_u64_le();
        let tombstone_count = buf.get_u64_le();
        let max_seq = buf.get_u64_le();
        let covers_from = buf.get_u64_le();
        let stored_crc = buf.get_u32_le();

        let footer_start = file_size - FOOTER_SIZE;
        if index_offset < HEADER_SIZE || index_offset > meta_offset || meta_offset > footer_start {
            return Err(StrataError::Corruption(format!(
                "segment {} has inconsistent block offsets",
                path.display()
            )));
        }

        // Load index + meta blocks and verify the footer checksum
        let mut blocks = vec![0u8; (footer_start - index_offset) as usize];
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_exact(&mut blocks)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&blocks);
        hasher.update(&footer[..48]);
        if hasher.finalize() != stored_crc {
            return Err(StrataError::Corruption(format!(
                "segment {} footer checksum mismatch",
                path.display()
            )));
        }

        let split = (meta_offset - index_offset) as usize;
        let index = parse_index(&blocks[..split], path)?;
        let mut meta_block = &blocks[split..];
        let min_key = take_key(&mut meta_block, path)?;
        let max_key = take_key(&mut meta_block, path)?;

        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            meta: SegmentMeta {
                path: path.to_path_buf(),
                generation,
                covers_from,
                record_count,
                tombstone_count,
                min_key,
                max_key,
                max_seq,
                file_size,
            },
            index,
            data_end: index_offset,
            file: Mutex::new(BufReader::new(file)),
            obsolete: AtomicBool::new(false),
        })
    }

    /// Look up a key.
    ///
    /// Binary-searches the sparse index for the last sampled key <= `key`, then
    /// scans forward at most one index interval. Returns tombstones as
    /// records; `None` means the key is not in this segment.
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        if !self.meta.might_contain(key) {
            return Ok(None);
        }

        let slot = self.index.partition_point(|(k, _)| k.as_slice() <= key);
        if slot == 0 {
            return Ok(None);
        }
        let start = self.index[slot - 1].1;
        let end = self
            .index
            .get(slot)
            .map(|(_, offset)| *offset)
            .unwrap_or(self.data_end);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(start))?;

        let mut offset = start;
        while offset < end {
            let (record, len) = read_record(&mut *file, offset, self.data_end)?;
            offset += len;
            match record.key.as_slice().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(record)),
                std::cmp::Ordering::Greater => return Ok(None),
            }
        }

        Ok(None)
    }

    /// Lazily iterate over records within bounds, ascending
    pub fn range(
        self: &Arc<Self>,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
    ) -> Result<SegmentIterator> {
        let start = match &lower {
            Bound::Included(k) | Bound::Excluded(k) => {
                let slot = self.index.partition_point(|(ik, _)| ik.as_slice() <= k.as_slice());
                if slot == 0 {
                    HEADER_SIZE
                } else {
                    self.index[slot - 1].1
                }
            }
            Bound::Unbounded => HEADER_SIZE,
        };
        SegmentIterator::new(Arc::clone(self), start, self.data_end, lower, upper)
    }

    /// Lazily iterate over every record (compaction, debugging)
    pub fn iter(self: &Arc<Self>) -> Result<SegmentIterator> {
        self.range(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn generation(&self) -> u64 {
        self.meta.generation
    }

    pub fn path(&self) -> &Path {
        &self.meta.path
    }

    /// Get record count
    pub fn record_count(&self) -> u64 {
        self.meta.record_count
    }

    /// Number of sparse index entries held in memory
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Quick check if a key might be in this segment (range check)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.meta.might_contain(key)
    }

    /// Schedule the file for deletion once no reader holds this segment
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }
}

impl Drop for SegmentReader {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        match fs::remove_file(&self.meta.path) {
            Ok(()) => {
                tracing::debug!(
                    generation = self.meta.generation,
                    path = %self.meta.path.display(),
                    "Deleted retired segment"
                );
            }
            Err(e) => {
                tracing::warn!(
                    generation = self.meta.generation,
                    path = %self.meta.path.display(),
                    error = %e,
                    "Failed to delete retired segment"
                );
            }
        }
    }
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("meta", &self.meta)
            .field("index_len", &self.index.len())
            .field("obsolete", &self.is_obsolete())
            .finish()
    }
}

/// Parse index entries: [key_len(4)][offset(8)][key]
fn parse_index(mut block: &[u8], path: &Path) -> Result<Vec<(Vec<u8>, u64)>> {
    let mut index = Vec::new();
    while block.has_remaining() {
        if block.remaining() < 12 {
            return Err(truncated(path, "index"));
        }
        let key_len = block.get_u32_le() as usize;
        let offset = block.get_u64_le();
        if block.remaining() < key_len {
            return Err(truncated(path, "index"));
        }
        let key = block[..key_len].to_vec();
        block.advance(key_len);
        index.push((key, offset));
    }
    Ok(index)
}

fn take_key(block: &mut &[u8], path: &Path) -> Result<Vec<u8>> {
    if block.remaining() < 4 {
        return Err(truncated(path, "meta"));
    }
    let len = block.get_u32_le() as usize;
    if block.remaining() < len {
        return Err(truncated(path, "meta"));
    }
    let key = block[..len].to_vec();
    block.advance(len);
    Ok(key)
}

fn truncated(path: &Path, block: &str) -> StrataError {
    StrataError::Corruption(format!("segment {} has a truncated {} block", path.display(), block))
}
