//! # Strata
//!
//! An embedded, single-node log-structured key-value engine with:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery with torn-tail handling
//! - Immutable sorted segments with sparse indexes
//! - Snapshot reads (point lookups and ordered range scans)
//! - Background flush and compaction
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │          (Single Writer / Multi Reader snapshots)           │
//! └───────┬──────────────────────┬──────────────────────┬───────┘
//!         │ write                │ read                 │ tasks
//!         ▼                      ▼                      ▼
//!   ┌───────────┐        ┌──────────────┐       ┌──────────────┐
//!   │    WAL    │        │  Read Path   │       │  Background  │
//!   │ (Append)  │        │ (k-way merge)│       │    Worker    │
//!   └─────┬─────┘        └──────┬───────┘       └──────┬───────┘
//!         ▼                     │                      │
//!   ┌───────────┐               │          flush       │ compact
//!   │ MemTables │◀──────────────┤◀─────────────────────┤
//!   │ (RwLock)  │               │                      │
//!   └───────────┘               ▼                      ▼
//!                        ┌─────────────────────────────────────┐
//!                        │        Segments (newest first)      │
//!                        └─────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod record;

pub mod wal;
pub mod memtable;
pub mod storage;
pub mod read;
pub mod compaction;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{StrataError, Result};
pub use config::{Config, WalSyncStrategy};
pub use engine::{CompactionSummary, Engine, EngineStats};
pub use read::ScanIterator;
pub use record::{Record, Value};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Strata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
