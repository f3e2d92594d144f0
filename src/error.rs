//! Error types for the token scan store
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using ScanStoreError
pub type Result<T> = std::result::Result<T, ScanStoreError>;

/// Unified error type for token scan store operations
#[derive(Debug, Error)]
pub enum ScanStoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Tree Errors
    // -------------------------------------------------------------------------
    #[error("Tree file not found: {}", .0.display())]
    TreeFileNotFound(PathBuf),

    #[error("Tree metadata mismatch: {0}")]
    MetadataMismatch(String),

    #[error("Tree corruption detected: {0}")]
    Corrupted(String),

    #[error("A writer is already open on this tree")]
    WriterAlreadyOpen,

    // -------------------------------------------------------------------------
    // Store Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("{name} file could not be found, most likely this database needs to be recovered, file: {}", path.display())]
    StoreNotFound { name: &'static str, path: PathBuf },

    #[error("{name} needs to be rebuilt but was opened in read only mode, file: {}", path.display())]
    NeedsRebuildReadOnly { name: &'static str, path: PathBuf },

    #[error("{0} is read only")]
    ReadOnly(&'static str),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    // -------------------------------------------------------------------------
    // Writer Errors
    // -------------------------------------------------------------------------
    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Entity id {0} is beyond the largest representable entity id")]
    EntityIdOutOfRange(u64),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Write Log Errors
    // -------------------------------------------------------------------------
    #[error("Write log error: {0}")]
    WriteLog(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for ScanStoreError {
    fn from(e: bincode::Error) -> Self {
        ScanStoreError::Serialization(e.to_string())
    }
}

impl ScanStoreError {
    /// Whether this error means the tree file is structurally unusable
    /// (as opposed to an environmental failure such as a permission error).
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ScanStoreError::MetadataMismatch(_) | ScanStoreError::Corrupted(_)
        )
    }
}
