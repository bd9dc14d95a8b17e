//! WAL Reader
//!
//! Sequential, lazy replay of a WAL file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Result, StrataError};

use super::entry::{checksum, decode_payload, parse_header};
use super::{WalEntry, HEADER_SIZE};

/// Reads entries from a WAL file in append order
///
/// A damaged final entry is reported as [`StrataError::WalTornTail`];
/// damage followed by more data is [`StrataError::Corruption`].
/// Re-open the file to replay it again.
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset of the next frame
    offset: u64,
    file_len: u64,
    /// Sequence number of the last entry returned
    last_seq: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
            file_len,
            last_seq: 0,
        })
    }

    /// Read the next entry from the WAL
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        if self.offset >= self.file_len {
            return Ok(None);
        }

        let remaining = self.file_len - self.offset;
        if remaining < HEADER_SIZE as u64 {
            return Err(StrataError::WalTornTail {
                offset: self.offset,
            });
        }

        let mut header = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header)?;
        let (seq, crc, len) = parse_header(&header);

        if u64::from(len) > remaining - HEADER_SIZE as u64 {
            // A torn append leaves nothing intact behind it. A damaged length
            // field in front of good frames does.
            let mut rest = Vec::new();
            self.reader.read_to_end(&mut rest)?;
            if let Some(at) = find_frame(&rest, self.last_seq) {
                return Err(StrataError::Corruption(format!(
                    "WAL frame at offset {} claims {} bytes but a valid entry starts at offset {}",
                    self.offset,
                    len,
                    self.offset + (HEADER_SIZE + at) as u64
                )));
            }
            return Err(StrataError::WalTornTail {
                offset: self.offset,
            });
        }

        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload)?;
        let end = self.offset + HEADER_SIZE as u64 + u64::from(len);

        if checksum(seq, len, &payload) != crc {
            if end == self.file_len {
                return Err(StrataError::WalTornTail {
                    offset: self.offset,
                });
            }
            return Err(StrataError::Corruption(format!(
                "WAL checksum mismatch at offset {} with {} bytes following",
                self.offset,
                self.file_len - end
            )));
        }

        let entry = decode_payload(seq, &payload)?;
        self.offset = end;
        self.last_seq = seq;
        Ok(Some(entry))
    }

    /// Byte offset just past the last entry returned
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Iterate over the remaining entries
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Position of the first complete, checksummed frame in `bytes` whose
/// sequence number is above `after_seq`
fn find_frame(bytes: &[u8], after_seq: u64) -> Option<usize> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    (0..=bytes.len() - HEADER_SIZE).find(|&start| {
        let (seq, crc, len) = parse_header(&bytes[start..start + HEADER_SIZE]);
        let body = start + HEADER_SIZE;
        seq > after_seq
            && len as usize <= bytes.len() - body
            && checksum(seq, len, &bytes[body..body + len as usize]) == crc
    })
}

/// Iterator over WAL entries; stops after the first error
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl IntoIterator for WalReader {
    type Item = Result<WalEntry>;
    type IntoIter = WalIterator;

    fn into_iter(self) -> Self::IntoIter {
        self.entries()
    }
}
