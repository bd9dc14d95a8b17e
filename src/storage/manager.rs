//! Storage Manager
//!
//! Owns the segment directory and the segment file lifecycle.
//!
//! ## Responsibilities
//! - Discover existing segments on startup (newest → oldest)
//! - Discard leftovers from interrupted flushes and compactions
//! - Hand out monotonically increasing generation numbers
//! - Write new segments with an all-or-nothing publish

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::record::Record;

use super::{SegmentBuilder, SegmentReader};

const SEGMENT_EXTENSION: &str = "sst";
const TEMP_EXTENSION: &str = "tmp";

/// Manages the segment directory
///
/// ## Concurrency:
/// - `next_generation`: Atomic counter (lock-free)
/// - All methods use `&self`; the live-segment registry itself belongs to
///   the engine's state snapshot
pub struct StorageManager {
    /// Directory where segments are stored
    dir: PathBuf,

    /// Records per sparse index entry for new segments
    index_interval: usize,

    /// Next generation for new segments (atomic, lock-free)
    next_generation: AtomicU64,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Delete temporary files left by an interrupted publish
    /// 3. Open readers for each segment (loads sparse indexes into RAM)
    /// 4. Delete segments already folded into a compaction output
    /// 5. Order by generation descending (newest first)
    pub fn open(dir: &Path, index_interval: usize) -> Result<(Self, Vec<Arc<SegmentReader>>)> {
        fs::create_dir_all(dir)?;

        let mut segments = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            if path.extension().map_or(false, |ext| ext == TEMP_EXTENSION) {
                tracing::info!(path = %path.display(), "Discarding incomplete segment");
                fs::remove_file(&path)?;
                continue;
            }

            if Self::parse_generation(&path).is_some() {
                segments.push(Arc::new(SegmentReader::open(&path)?));
            }
        }

        // A crash between compaction publish and input deletion leaves the
        // inputs behind; they must not come back to life.
        let (mut live, superseded): (Vec<_>, Vec<_>) = segments.iter().cloned().partition(|segment| {
            !segments
                .iter()
                .any(|other| other.meta().supersedes(segment.generation()))
        });
        for segment in superseded {
            tracing::info!(
                generation = segment.generation(),
                "Deleting segment superseded by compaction"
            );
            segment.mark_obsolete();
        }
        drop(segments);

        live.sort_by(|a, b| b.generation().cmp(&a.generation()));

        let next_generation = live.first().map(|s| s.generation() + 1).unwrap_or(1);

        let manager = Self {
            dir: dir.to_path_buf(),
            index_interval,
            next_generation: AtomicU64::new(next_generation),
        };
        Ok((manager, live))
    }

    /// Reserve the next generation number
    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    /// Peek at the generation the next segment would get (for testing/debugging)
    pub fn peek_generation(&self) -> u64 {
        self.next_generation.load(Ordering::SeqCst)
    }

    /// Write sorted records as a new segment and publish it.
    ///
    /// Records go to `segment_{gen}.sst.tmp`, which is fsynced and renamed
    /// into place; the directory is fsynced after the rename. The returned
    /// reader is the first moment the segment is visible. On error the
    /// temporary file is removed and nothing is published.
    ///
    /// `covers_from` is the oldest generation this segment replaces (equal to
    /// `generation` for a flush).
    pub fn write_segment<I>(
        &self,
        generation: u64,
        covers_from: u64,
        records: I,
    ) -> Result<Arc<SegmentReader>>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        self.publish(generation, covers_from, 0, records)
    }

    /// Like [`write_segment`](Self::write_segment), for a compaction output.
    ///
    /// The footer's `max_seq` is at least `max_seq_floor` (the highest
    /// `max_seq` among the inputs), so purged tombstones never lower the
    /// sequence number the engine resumes from. The file is written even when
    /// every record was purged: its `covers_from` is what retires the inputs.
    pub fn write_compaction_output<I>(
        &self,
        generation: u64,
        covers_from: u64,
        max_seq_floor: u64,
        records: I,
    ) -> Result<Arc<SegmentReader>>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        self.publish(generation, covers_from, max_seq_floor, records)
    }

    fn publish<I>(
        &self,
        generation: u64,
        covers_from: u64,
        max_seq_floor: u64,
        records: I,
    ) -> Result<Arc<SegmentReader>>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        let final_path = self.segment_path(generation);
        let temp_path = final_path.with_extension(format!("{}.{}", SEGMENT_EXTENSION, TEMP_EXTENSION));

        let written = Self::build(
            &temp_path,
            generation,
            covers_from,
            max_seq_floor,
            self.index_interval,
            records,
        );
        let meta = match written {
            Ok(meta) => meta,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
        };

        fs::rename(&temp_path, &final_path)?;
        sync_dir(&self.dir)?;

        tracing::debug!(
            generation,
            records = meta.record_count,
            tombstones = meta.tombstone_count,
            bytes = meta.file_size,
            "Published segment"
        );

        Ok(Arc::new(SegmentReader::open(&final_path)?))
    }

    /// Get the data directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generate the file path for a segment with given generation
    pub fn segment_path(&self, generation: u64) -> PathBuf {
        self.dir
            .join(format!("segment_{:06}.{}", generation, SEGMENT_EXTENSION))
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn build<I>(
        path: &Path,
        generation: u64,
        covers_from: u64,
        max_seq_floor: u64,
        index_interval: usize,
        records: I,
    ) -> Result<super::SegmentMeta>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        let mut builder = SegmentBuilder::new(path, generation, index_interval)?
            .covers_from(covers_from)
            .max_seq_floor(max_seq_floor);
        for record in records {
            builder.add(&record?)?;
        }
        builder.finish()
    }

    /// Parse generation from filename
    /// "segment_000042.sst" → Some(42)
    fn parse_generation(path: &Path) -> Option<u64> {
        if path.extension()? != SEGMENT_EXTENSION {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        name.strip_prefix("segment_")?.parse().ok()
    }
}

/// Make a rename durable
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
