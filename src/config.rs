//! Configuration for Strata
//!
//! Centralized configuration with sensible defaults. None of the tunables
//! below are hard contracts; they trade memory, write amplification and read
//! cost against each other.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, StrataError};

/// Main configuration for a Strata instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files (WAL, segments)
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal/             (one write-ahead log per memtable)
    ///     └── segments/        (segment files)
    pub data_dir: PathBuf,

    /// Sparse index sampling interval: one index entry every N records.
    ///
    /// Smaller values cost more index memory per segment, larger values
    /// lengthen the forward scan of a point lookup (at most N records).
    pub index_interval: usize,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before it is frozen and flushed (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Compact when the number of live segments exceeds this
    pub compaction_segment_threshold: usize,

    /// Compact when tombstones / records across live segments exceeds this
    pub compaction_tombstone_ratio: f64,

    /// Upper bound on the number of segments merged by one compaction
    pub max_compaction_run: usize,

    // -------------------------------------------------------------------------
    // Background Work Configuration
    // -------------------------------------------------------------------------
    /// First retry delay after a failed flush or compaction (milliseconds)
    pub background_retry_base_ms: u64,

    /// Retry delay cap (milliseconds)
    pub background_retry_max_ms: u64,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced entries (balanced durability/performance).
    /// Up to `count - 1` acknowledged writes may be lost on power failure.
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./strata_data"),
            index_interval: 16,
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            memtable_size_limit: 4 * 1024 * 1024, // 4 MB
            compaction_segment_threshold: 4,
            compaction_tombstone_ratio: 0.5,
            max_compaction_run: 16,
            background_retry_base_ms: 50,
            background_retry_max_ms: 5_000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the tunables are usable
    pub fn validate(&self) -> Result<()> {
        if self.index_interval == 0 {
            return Err(StrataError::Config(
                "index_interval must be at least 1".to_string(),
            ));
        }
        if self.memtable_size_limit == 0 {
            return Err(StrataError::Config(
                "memtable_size_limit must be non-zero".to_string(),
            ));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(StrataError::Config(
                "EveryNEntries count must be at least 1".to_string(),
            ));
        }
        if self.max_compaction_run < 2 {
            return Err(StrataError::Config(
                "max_compaction_run must be at least 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.compaction_tombstone_ratio) {
            return Err(StrataError::Config(format!(
                "compaction_tombstone_ratio must be within [0, 1], got {}",
                self.compaction_tombstone_ratio
            )));
        }
        if self.background_retry_base_ms > self.background_retry_max_ms {
            return Err(StrataError::Config(
                "background_retry_base_ms exceeds background_retry_max_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding WAL files
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    /// Directory holding segment files
    pub fn segment_dir(&self) -> PathBuf {
        self.data_dir.join("segments")
    }

    pub(crate) fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let ms = self
            .background_retry_base_ms
            .saturating_mul(factor)
            .min(self.background_retry_max_ms);
        Duration::from_millis(ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the sparse index interval (records per index entry)
    pub fn index_interval(mut self, interval: usize) -> Self {
        self.config.index_interval = interval;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the live segment count that triggers compaction
    pub fn compaction_segment_threshold(mut self, count: usize) -> Self {
        self.config.compaction_segment_threshold = count;
        self
    }

    /// Set the tombstone ratio that triggers compaction
    pub fn compaction_tombstone_ratio(mut self, ratio: f64) -> Self {
        self.config.compaction_tombstone_ratio = ratio;
        self
    }

    /// Set the maximum number of segments merged in one compaction
    pub fn max_compaction_run(mut self, count: usize) -> Self {
        self.config.max_compaction_run = count;
        self
    }

    /// Set the background retry backoff (base and cap, in milliseconds)
    pub fn background_retry_ms(mut self, base: u64, max: u64) -> Self {
        self.config.background_retry_base_ms = base;
        self.config.background_retry_max_ms = max;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
