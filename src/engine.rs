//! Engine Module
//!
//! The storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Coordinate WAL, memtables, segments and the background worker
//! - Serve point lookups and range scans from a consistent snapshot
//! - Freeze full memtables and hand them to the background flush
//! - Manage crash recovery on startup
//!
//! ## Write Path
//! ```text
//! put/delete ─▶ WAL lock ─▶ seq = counter + 1 ─▶ WAL append ─▶ active memtable
//!                                                                  │ full?
//!                                                                  ▼
//!                                   freeze (new WAL + new active) ─▶ Flush task
//! ```
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── wal/wal_{id:06}.log              one per unflushed memtable
//!   └── segments/segment_{gen:06}.sst    immutable segments
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};

use crate::compaction::{self, BackgroundWorker, CompactionPolicy, Maintenance, TaskKind};
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::memtable::MemTable;
use crate::read::{ReadView, ScanIterator};
use crate::record::{Record, Value};
use crate::storage::StorageManager;
use crate::wal::{self, WalRecovery, WalWriter};

/// Largest accepted key (bytes)
pub const MAX_KEY_SIZE: usize = 64 * 1024;

/// Largest accepted value (bytes)
pub const MAX_VALUE_SIZE: usize = 1024 * 1024 * 1024;

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete): Serialized by the WAL mutex. Sequence
///   assignment, WAL append and memtable insert happen under it, so WAL order
///   equals sequence order.
///
/// - **Reads** (get/scan): Lock-free with respect to writers. A reader clones
///   the current `Arc<ReadView>` and works on that snapshot.
///
/// - **Maintenance** (flush/compaction): Serialized by the maintenance mutex.
///   Runs on the background worker, or inline for `flush()`/`compact()`.
///   Publishing swaps in a new `ReadView` under a brief write lock.
pub struct Engine {
    inner: Arc<EngineInner>,

    /// Background worker; taken on close
    worker: Mutex<Option<BackgroundWorker>>,
}

/// Summary of one compaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionSummary {
    /// Generation of the new segment
    pub output_generation: u64,

    /// Generations merged away
    pub input_generations: Vec<u64>,

    /// Records in the new segment
    pub records_written: u64,

    /// Tombstones removed for good
    pub tombstones_dropped: u64,
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Live segments
    pub segment_count: usize,

    /// Generations of the live segments, newest first
    pub segment_generations: Vec<u64>,

    /// Total size of the live segment files
    pub segment_bytes: u64,

    /// Records across live segments, tombstones included
    pub segment_records: u64,

    /// Tombstones across live segments
    pub segment_tombstones: u64,

    /// Frozen memtables waiting for flush
    pub frozen_memtables: usize,

    /// Entries in the active memtable
    pub memtable_entries: usize,

    /// Estimated size of the active memtable
    pub memtable_bytes: usize,

    /// Last assigned sequence number
    pub last_sequence: u64,

    /// Memtables flushed since open
    pub flushes: u64,

    /// Compactions finished since open
    pub compactions: u64,
}

pub(crate) struct EngineInner {
    config: Config,

    wal_dir: PathBuf,

    storage: StorageManager,

    policy: CompactionPolicy,

    /// Current snapshot of every readable source
    view: RwLock<Arc<ReadView>>,

    /// WAL of the active memtable; holding it serializes writers
    wal: Mutex<WalWriter>,

    /// Serializes flushes and compactions
    maintenance: Mutex<()>,

    /// Last assigned sequence number
    sequence: AtomicU64,

    /// Id for the next WAL file
    next_wal_id: AtomicU64,

    tasks: Sender<TaskKind>,

    closed: AtomicBool,

    /// Aborts in-progress compaction on shutdown
    shutting_down: AtomicBool,

    flushes: AtomicU64,
    compactions: AtomicU64,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data, WAL and segment directories
    /// 2. Load live segments (discarding unfinished and superseded files)
    /// 3. Replay WAL files newer than the segments and flush them
    /// 4. Start the background worker
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let wal_dir = config.wal_dir();
        fs::create_dir_all(&config.data_dir)?;
        fs::create_dir_all(&wal_dir)?;

        let (storage, segments) = StorageManager::open(&config.segment_dir(), config.index_interval)?;
        let durable_seq = segments.iter().map(|s| s.meta().max_seq).max().unwrap_or(0);

        let old_wals = wal::list_wal_files(&wal_dir)?;
        let active_wal_id = old_wals.last().map(|(id, _)| id + 1).unwrap_or(1);
        let active = Arc::new(MemTable::with_wal_id(active_wal_id));
        let wal = WalWriter::open(&wal::wal_path(&wal_dir, active_wal_id), config.wal_sync_strategy)?;

        let (sender, receiver) = channel::unbounded();

        let inner = Arc::new(EngineInner {
            policy: CompactionPolicy::from_config(&config),
            wal_dir,
            storage,
            view: RwLock::new(Arc::new(ReadView::new(active, segments))),
            wal: Mutex::new(wal),
            maintenance: Mutex::new(()),
            sequence: AtomicU64::new(durable_seq),
            next_wal_id: AtomicU64::new(active_wal_id + 1),
            tasks: sender.clone(),
            closed: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            flushes: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
            config,
        });

        inner.recover(old_wals)?;

        let worker = BackgroundWorker::spawn(Arc::clone(&inner), sender, receiver)?;
        inner.schedule(TaskKind::Compaction);

        let view = inner.view();
        tracing::info!(
            data_dir = %inner.config.data_dir.display(),
            segments = view.segments.len(),
            last_seq = inner.sequence.load(Ordering::Acquire),
            "Engine opened"
        );

        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Get the current value of a key
    ///
    /// Search order:
    /// 1. Active memtable
    /// 2. Frozen memtables (newest to oldest)
    /// 3. Segments (newest to oldest)
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.ensure_open()?;
        self.inner.view().get(key)
    }

    /// Put a key-value pair
    ///
    /// Durable (per the WAL sync strategy) once this returns `Ok`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(StrataError::InvalidInput(format!(
                "value of {} bytes exceeds the {} byte limit",
                value.len(),
                MAX_VALUE_SIZE
            )));
        }
        self.inner.write(key, Value::Put(value.to_vec()))
    }

    /// Delete a key (writes a tombstone)
    ///
    /// Deleting an absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.write(key, Value::Tombstone)
    }

    /// Live pairs with `low <= key <= high`, in ascending key order
    ///
    /// The set of memtables and segments is fixed when the scan starts, so
    /// flushes and compactions never disturb it.
    pub fn scan(&self, low: &[u8], high: &[u8]) -> Result<ScanIterator> {
        self.inner.ensure_open()?;
        self.inner.view().scan(low, high)
    }

    /// Flush the active memtable and every frozen one to segments
    ///
    /// Blocks until the segments are published.
    pub fn flush(&self) -> Result<()> {
        self.inner.ensure_open()?;
        {
            let mut wal = self.inner.wal.lock();
            if !self.inner.view().active.is_empty() {
                self.inner.freeze(&mut wal)?;
            }
        }
        self.inner.flush_frozen()?;
        self.inner.schedule(TaskKind::Compaction);
        Ok(())
    }

    /// Compact every live segment into one, regardless of thresholds
    ///
    /// Returns `None` when there is nothing to compact.
    pub fn compact(&self) -> Result<Option<CompactionSummary>> {
        self.inner.ensure_open()?;
        self.inner.compact_once(true)
    }

    /// Close the engine gracefully
    ///
    /// Flushes the memtables, stops the background worker and syncs the WAL.
    /// Further calls return [`StrataError::Closed`]; closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        {
            let mut wal = self.inner.wal.lock();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            if !self.inner.view().active.is_empty() {
                self.inner.freeze(&mut wal)?;
            }
        }

        let flushed = self.inner.flush_frozen();
        self.stop_worker();
        self.inner.wal.lock().sync()?;
        flushed?;

        tracing::info!(
            last_seq = self.inner.sequence.load(Ordering::Acquire),
            "Engine closed"
        );
        Ok(())
    }

    fn stop_worker(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        if let Some(mut worker) = self.worker.lock().take() {
            worker.shutdown();
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the number of live segments
    pub fn segment_count(&self) -> usize {
        self.inner.view().segments.len()
    }

    /// Live segment generations, newest first
    pub fn segment_generations(&self) -> Vec<u64> {
        self.inner.view().segments.iter().map(|s| s.generation()).collect()
    }

    /// Get the active memtable size
    pub fn memtable_size(&self) -> usize {
        self.inner.view().active.size()
    }

    /// Get the active memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.inner.view().active.entry_count()
    }

    /// Number of frozen memtables waiting for flush
    pub fn frozen_memtable_count(&self) -> usize {
        self.inner.view().frozen.len()
    }

    /// Last assigned sequence number
    pub fn last_sequence(&self) -> u64 {
        self.inner.sequence.load(Ordering::Acquire)
    }

    /// Snapshot of segment, memtable and maintenance counters
    pub fn stats(&self) -> EngineStats {
        let view = self.inner.view();
        EngineStats {
            segment_count: view.segments.len(),
            segment_generations: view.segments.iter().map(|s| s.generation()).collect(),
            segment_bytes: view.segments.iter().map(|s| s.meta().file_size).sum(),
            segment_records: view.segments.iter().map(|s| s.meta().record_count).sum(),
            segment_tombstones: view.segments.iter().map(|s| s.meta().tombstone_count).sum(),
            frozen_memtables: view.frozen.len(),
            memtable_entries: view.active.entry_count(),
            memtable_bytes: view.active.size(),
            last_sequence: self.last_sequence(),
            flushes: self.inner.flushes.load(Ordering::Relaxed),
            compactions: self.inner.compactions.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Engine {
    /// Stops the worker without flushing; unflushed writes stay in the WAL
    /// and are recovered by the next `open`.
    fn drop(&mut self) {
        self.stop_worker();
        if let Err(e) = self.inner.wal.lock().sync() {
            tracing::warn!(error = %e, "Failed to sync WAL on drop");
        }
    }
}

impl EngineInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StrataError::Closed);
        }
        Ok(())
    }

    fn view(&self) -> Arc<ReadView> {
        Arc::clone(&self.view.read())
    }

    fn schedule(&self, task: TaskKind) {
        if self.tasks.send(task).is_err() {
            tracing::debug!(task = ?task, "Background worker gone, task dropped");
        }
    }

    /// Replace the current view with `update(current)`
    fn publish<F>(&self, update: F)
    where
        F: FnOnce(&mut ReadView),
    {
        let mut view = self.view.write();
        let mut next = ReadView::clone(&view);
        update(&mut next);
        *view = Arc::new(next);
    }

    fn write(&self, key: &[u8], value: Value) -> Result<()> {
        if key.len() > MAX_KEY_SIZE {
            return Err(StrataError::InvalidInput(format!(
                "key of {} bytes exceeds the {} byte limit",
                key.len(),
                MAX_KEY_SIZE
            )));
        }

        let mut wal = self.wal.lock();
        self.ensure_open()?;

        // Step 1: WAL first. On failure nothing reaches the memtable.
        let seq = self.sequence.load(Ordering::Acquire) + 1;
        wal.append(seq, key, &value)?;
        self.sequence.store(seq, Ordering::Release);

        // Step 2: Memtable
        let active = Arc::clone(&self.view.read().active);
        active.insert(key.to_vec(), value, seq);

        // Step 3: Freeze if full. The write is already committed, so a failed
        // freeze only leaves the active memtable oversized; the next write
        // tries again.
        if active.should_flush(self.config.memtable_size_limit) {
            match self.freeze(&mut wal) {
                Ok(()) => self.schedule(TaskKind::Flush),
                Err(e) => tracing::warn!(
                    wal_id = active.wal_id(),
                    bytes = active.size(),
                    error = %e,
                    "Failed to freeze full memtable"
                ),
            }
        }

        Ok(())
    }

    /// Swap in a fresh active memtable and WAL. Called with the WAL lock held.
    fn freeze(&self, wal: &mut WalWriter) -> Result<()> {
        // The frozen memtable's entries must be durable before a new WAL
        // takes over.
        wal.sync()?;

        let wal_id = self.next_wal_id.fetch_add(1, Ordering::AcqRel);
        let fresh_wal = WalWriter::open(&wal::wal_path(&self.wal_dir, wal_id), self.config.wal_sync_strategy)?;

        let fresh = Arc::new(MemTable::with_wal_id(wal_id));
        self.publish(|view| {
            let frozen = std::mem::replace(&mut view.active, fresh);
            frozen.mark_flushing();
            tracing::debug!(
                wal_id = frozen.wal_id(),
                entries = frozen.entry_count(),
                bytes = frozen.size(),
                "Froze memtable"
            );
            view.frozen.insert(0, frozen);
        });
        *wal = fresh_wal;
        Ok(())
    }

    /// Flush frozen memtables oldest first; returns how many were flushed
    fn flush_frozen(&self) -> Result<usize> {
        let _guard = self.maintenance.lock();
        let mut flushed = 0;

        loop {
            let memtable = match self.view.read().frozen.last() {
                Some(memtable) => Arc::clone(memtable),
                None => break,
            };

            let generation = self.storage.next_generation();
            let segment = self.storage.write_segment(
                generation,
                generation,
                memtable.iter().map(Ok::<Record, StrataError>),
            )?;

            self.publish(|view| {
                view.frozen.retain(|m| !Arc::ptr_eq(m, &memtable));
                view.segments.insert(0, segment);
            });
            memtable.mark_retired();
            self.flushes.fetch_add(1, Ordering::Relaxed);

            let wal_path = wal::wal_path(&self.wal_dir, memtable.wal_id());
            match fs::remove_file(&wal_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                // Harmless: recovery skips entries already in a segment
                Err(e) => tracing::warn!(path = %wal_path.display(), error = %e, "Failed to delete WAL"),
            }

            tracing::info!(
                generation,
                entries = memtable.entry_count(),
                max_seq = memtable.max_seq(),
                "Flushed memtable"
            );
            flushed += 1;
        }

        Ok(flushed)
    }

    /// Run one compaction if `force` or a trigger fires
    fn compact_once(&self, force: bool) -> Result<Option<CompactionSummary>> {
        let _guard = self.maintenance.lock();

        let view = self.view();
        let plan = if force {
            CompactionPolicy::manual(&view.segments)
        } else {
            self.policy.pick(&view.segments)
        };
        drop(view);
        let plan = match plan {
            Some(plan) => plan,
            None => return Ok(None),
        };

        let outcome = compaction::compact(&self.storage, &plan, &self.shutting_down)?;
        let output = Arc::clone(&outcome.output);

        self.publish(|view| {
            view.segments.retain(|s| !plan.contains(s.generation()));
            view.segments.push(output);
            view.segments.sort_by(|a, b| b.generation().cmp(&a.generation()));
        });
        // Readers holding an older view keep the files open until they finish
        for input in &plan.inputs {
            input.mark_obsolete();
        }
        self.compactions.fetch_add(1, Ordering::Relaxed);

        let summary = CompactionSummary {
            output_generation: outcome.output.generation(),
            input_generations: plan.generations(),
            records_written: outcome.output.record_count(),
            tombstones_dropped: outcome.tombstones_dropped,
        };
        tracing::info!(
            output = summary.output_generation,
            inputs = ?summary.input_generations,
            records_in = outcome.records_in,
            records_out = summary.records_written,
            tombstones_dropped = summary.tombstones_dropped,
            "Compaction finished"
        );
        Ok(Some(summary))
    }

    /// Replay WAL files left by a previous run.
    ///
    /// Entries already covered by a segment are skipped. Each remaining WAL
    /// becomes a frozen memtable, and all of them are flushed before `open`
    /// returns; a WAL is deleted only once its segment is published.
    fn recover(&self, wal_files: Vec<(u64, PathBuf)>) -> Result<()> {
        let durable_seq = self.sequence.load(Ordering::Acquire);
        let mut last_seq = durable_seq;
        let mut recovered = Vec::new();

        for (wal_id, path) in wal_files {
            let memtable = MemTable::with_wal_id(wal_id);
            let result = WalRecovery::replay(&path, |entry| {
                if entry.seq > durable_seq {
                    memtable.insert(entry.key, entry.value, entry.seq);
                }
                Ok(())
            })?;
            last_seq = last_seq.max(result.last_seq);

            tracing::info!(
                path = %path.display(),
                entries = result.entries_recovered,
                replayed = memtable.entry_count(),
                truncated = result.was_truncated,
                "Replayed WAL"
            );

            if memtable.is_empty() {
                fs::remove_file(&path)?;
                continue;
            }
            memtable.mark_flushing();
            recovered.push(Arc::new(memtable));
        }

        self.sequence.store(last_seq, Ordering::Release);

        if !recovered.is_empty() {
            recovered.reverse();
            self.publish(|view| view.frozen = recovered);
            self.flush_frozen()?;
        }
        Ok(())
    }
}

impl Maintenance for EngineInner {
    fn run_task(&self, task: TaskKind) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Ok(());
        }
        if task == TaskKind::Flush {
            self.flush_frozen()?;
        }
        while !self.shutting_down.load(Ordering::Acquire) {
            if self.compact_once(false)?.is_none() {
                break;
            }
        }
        Ok(())
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.config.retry_delay(attempt)
    }
}
