//! Segment Iterator
//!
//! Sequential iteration over the records of a segment.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::ops::Bound;
use std::sync::Arc;

use crate::error::Result;
use crate::record::Record;

use super::read_record;
use super::reader::SegmentReader;

/// Iterator over segment records in ascending key order
///
/// Holds an `Arc` to its segment, which keeps the file alive even if the
/// segment is retired by compaction mid-scan. Stops after the first error.
pub struct SegmentIterator {
    segment: Arc<SegmentReader>,
    file: BufReader<File>,
    /// Current position in file
    offset: u64,
    /// Stop reading when we reach this offset (start of index block)
    end: u64,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    done: bool,
}

impl SegmentIterator {
    pub(super) fn new(
        segment: Arc<SegmentReader>,
        start: u64,
        end: u64,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
    ) -> Result<Self> {
        let mut file = BufReader::new(File::open(segment.path())?);
        file.seek(SeekFrom::Start(start))?;
        Ok(Self {
            segment,
            file,
            offset: start,
            end,
            lower,
            upper,
            done: false,
        })
    }

    /// Generation of the segment being read
    pub fn generation(&self) -> u64 {
        self.segment.generation()
    }

    fn below_lower(&self, key: &[u8]) -> bool {
        match &self.lower {
            Bound::Included(low) => key < low.as_slice(),
            Bound::Excluded(low) => key <= low.as_slice(),
            Bound::Unbounded => false,
        }
    }

    fn above_upper(&self, key: &[u8]) -> bool {
        match &self.upper {
            Bound::Included(high) => key > high.as_slice(),
            Bound::Excluded(high) => key >= high.as_slice(),
            Bound::Unbounded => false,
        }
    }
}

impl Iterator for SegmentIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.offset < self.end {
            let (record, len) = match read_record(&mut self.file, self.offset, self.end) {
                Ok(read) => read,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            self.offset += len;

            if self.below_lower(&record.key) {
                continue;
            }
            if self.above_upper(&record.key) {
                self.done = true;
                return None;
            }
            return Some(Ok(record));
        }
        None
    }
}
