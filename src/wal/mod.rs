//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append log entries before any mutation becomes visible
//! - CRC32 checksums for corruption detection
//! - Sequence numbers for ordering and recovery filtering
//! - Crash recovery and replay
//!
//! Every memtable owns one log file, `wal_{id:06}.log`. The file is deleted
//! once the memtable it protects has been published as a segment.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Entry 1                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ Seq (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Entry 2                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ Seq (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//! `Data` is the bincode encoding of `(key, value-or-tombstone)`; the CRC
//! covers `Seq`, `Len` and `Data`.

mod entry;
mod writer;
mod reader;
mod recovery;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use entry::{WalEntry, HEADER_SIZE};
pub use writer::WalWriter;
pub use reader::WalReader;
pub use recovery::{WalRecovery, RecoveryResult};

/// File path of the WAL with the given id inside `dir`
pub fn wal_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("wal_{:06}.log", id))
}

/// Parse a WAL id from its filename
/// "wal_000042.log" → Some(42)
pub fn parse_wal_id(path: &Path) -> Option<u64> {
    if path.extension()? != "log" {
        return None;
    }
    let name = path.file_stem()?.to_string_lossy();
    name.strip_prefix("wal_")?.parse().ok()
}

/// All WAL files in `dir`, oldest id first
pub fn list_wal_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(id) = parse_wal_id(&path) {
            files.push((id, path));
        }
    }
    files.sort_by_key(|(id, _)| *id);
    Ok(files)
}
