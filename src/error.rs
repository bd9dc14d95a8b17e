//! Error types for Strata
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for Strata operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    /// Checksum or format mismatch in a segment or in the middle of a WAL
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// The final WAL entry is incomplete (a write was cut off by a crash).
    /// Recovery truncates the log at `offset`; it is never surfaced from `open`.
    #[error("WAL torn tail at offset {offset}")]
    WalTornTail { offset: u64 },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine is closed")]
    Closed,
}

impl From<bincode::Error> for StrataError {
    fn from(err: bincode::Error) -> Self {
        StrataError::Serialization(err.to_string())
    }
}

impl StrataError {
    /// True for errors that indicate on-disk data cannot be trusted
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StrataError::Corruption(_) | StrataError::WalTornTail { .. }
        )
    }
}
