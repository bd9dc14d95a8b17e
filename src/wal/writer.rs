//! WAL Writer
//!
//! Handles appending entries to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{Result, StrataError};
use crate::record::Value;

use super::entry::encode_frame;

/// Writes entries to one WAL file
///
/// The file is only ever appended to. A failed append rolls the file back to
/// its last good length so a later append never lands behind garbage.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    sync_strategy: WalSyncStrategy,
    /// Length of the file covering only complete frames
    len: u64,
    /// Entries appended since the last fsync
    unsynced: usize,
    entries_written: u64,
    last_seq: Option<u64>,
    /// Set when a failed append could not be rolled back, or its fsync failed
    poisoned: bool,
}

impl WalWriter {
    /// Open or create a WAL file, appending after any existing content
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            file,
            path: path.to_path_buf(),
            sync_strategy,
            len,
            unsynced: 0,
            entries_written: 0,
            last_seq: None,
            poisoned: false,
        })
    }

    /// Append an entry to the WAL
    ///
    /// With `WalSyncStrategy::EveryWrite` the entry is on stable storage when
    /// this returns `Ok`.
    pub fn append(&mut self, seq: u64, key: &[u8], value: &Value) -> Result<()> {
        if self.poisoned {
            return Err(StrataError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("WAL {} is unusable after a failed write", self.path.display()),
            )));
        }

        let frame = encode_frame(seq, key, value)?;

        if let Err(e) = self.file.write_all(&frame) {
            self.rollback();
            return Err(e.into());
        }
        self.len += frame.len() as u64;
        self.unsynced += 1;
        self.entries_written += 1;
        self.last_seq = Some(seq);

        let should_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if should_sync {
            if let Err(e) = self.sync() {
                // The frame may or may not be durable; nothing may follow it
                self.poisoned = true;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        if self.unsynced == 0 {
            return Ok(());
        }
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries appended through this writer
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Sequence number of the most recent append, if any
    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Size of the file in bytes (complete frames only)
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn rollback(&mut self) {
        match self.file.set_len(self.len) {
            Ok(()) => {
                tracing::warn!(path = %self.path.display(), len = self.len, "Rolled back partial WAL write");
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to roll back partial WAL write");
                self.poisoned = true;
            }
        }
    }
}
