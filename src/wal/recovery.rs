//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::{Result, StrataError};

use super::{WalEntry, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted entries skipped (only ever a torn tail)
    pub entries_corrupted: u64,

    /// Last valid sequence number (0 if the log was empty)
    pub last_seq: u64,

    /// Whether the WAL was (or would be) truncated to drop a torn tail
    pub was_truncated: bool,
}

impl WalRecovery {
    /// Replay a WAL file, handing every valid entry to `apply` in order.
    ///
    /// A torn final entry is cut off the file; corruption anywhere else aborts
    /// with [`StrataError::Corruption`].
    pub fn replay<F>(path: &Path, apply: F) -> Result<RecoveryResult>
    where
        F: FnMut(WalEntry) -> Result<()>,
    {
        let result = Self::scan(path, apply)?;
        if let Some(offset) = result.1 {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(offset)?;
            file.sync_all()?;
            tracing::warn!(
                path = %path.display(),
                offset,
                "Truncated torn WAL tail"
            );
        }
        Ok(result.0)
    }

    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read all valid entries
    /// 2. Truncate a partial write at the end
    /// 3. Return all valid entries in order
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let mut entries = Vec::new();
        let result = Self::replay(path, |entry| {
            entries.push(entry);
            Ok(())
        })?;
        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::scan(path, |_| Ok(())).map(|(result, _)| result)
    }

    /// Returns the stats plus the truncation offset of a torn tail, if any
    fn scan<F>(path: &Path, mut apply: F) -> Result<(RecoveryResult, Option<u64>)>
    where
        F: FnMut(WalEntry) -> Result<()>,
    {
        let mut result = RecoveryResult::default();
        let mut reader = WalReader::open(path)?;

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    result.entries_recovered += 1;
                    result.last_seq = entry.seq;
                    apply(entry)?;
                }
                Ok(None) => return Ok((result, None)),
                Err(StrataError::WalTornTail { offset }) => {
                    result.entries_corrupted += 1;
                    result.was_truncated = true;
                    return Ok((result, Some(offset)));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
