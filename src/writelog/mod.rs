//! Write Log Module
//!
//! Optional diagnostic journal of every low-level write made to the index.
//! It is purely observational: nothing reads it back during recovery.
//!
//! ## File Format
//! ```text
//! ┌──────────┬──────────────────────────────────────────────┐
//! │ Tag (1)  │ Payload (big-endian)                         │
//! ├──────────┼──────────────────────────────────────────────┤
//! │ 0        │ PREPARE_ADD    tx_id (8) | offset (1)        │
//! │ 1        │ PREPARE_REMOVE tx_id (8) | offset (1)        │
//! │ 2        │ MERGE_ADD      existing (8) | delta (8)      │
//! │ 3        │ MERGE_REMOVE   existing (8) | delta (8)      │
//! │ 4        │ RANGE          id_range (8) | token_id (4)   │
//! │ 5        │ FLUSH          -                             │
//! │ 6        │ SESSION_END    -                             │
//! └──────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Prepare and merge records apply to the most recent RANGE record.
//! The live file is `<store>.writelog`; rotated files are
//! `<store>.writelog-<epochMillis>`.

mod dump;
mod journal;
mod reader;

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::layout::TokenScanValue;

pub use dump::{dump_write_log, DumpOptions, DumpSummary, TxFilter};
pub use journal::WriteLog;
pub use reader::{read_events, WriteLogEvent, WriteLogReader};

// =============================================================================
// Record Tags
// =============================================================================

pub const TYPE_PREPARE_ADD: u8 = 0;
pub const TYPE_PREPARE_REMOVE: u8 = 1;
pub const TYPE_MERGE_ADD: u8 = 2;
pub const TYPE_MERGE_REMOVE: u8 = 3;
pub const TYPE_RANGE: u8 = 4;
pub const TYPE_FLUSH: u8 = 5;
pub const TYPE_SESSION_END: u8 = 6;

/// Suffix of the live write log file
const WRITELOG_SUFFIX: &str = ".writelog";

// =============================================================================
// Monitor Trait
// =============================================================================

/// Observer of low-level index writes.
///
/// Record methods never fail: a broken journal must not break the index,
/// so implementations log their own I/O problems.
pub trait WriteMonitor: Send + Sync {
    /// Following prepare/merge records apply to this range of this token
    fn range(&self, _id_range: u64, _token_id: u32) {}

    /// An entity at `offset` in the current range is about to gain the token
    fn prepare_add(&self, _tx_id: u64, _offset: u32) {}

    /// An entity at `offset` in the current range is about to lose the token
    fn prepare_remove(&self, _tx_id: u64, _offset: u32) {}

    /// An add delta is merged into an existing value
    fn merge_add(&self, _existing: &TokenScanValue, _delta: &TokenScanValue) {}

    /// A remove delta is merged into an existing value
    fn merge_remove(&self, _existing: &TokenScanValue, _delta: &TokenScanValue) {}

    /// Pending changes are about to be merged into the tree
    fn flushed(&self) {}

    /// A writer session closed
    fn session_ended(&self) {}

    /// Make everything recorded so far durable
    fn force(&self) -> Result<()> {
        Ok(())
    }

    /// Flush and release the journal
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Monitor that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWriteMonitor;

impl WriteMonitor for NoopWriteMonitor {}

// =============================================================================
// File Naming
// =============================================================================

/// Live write log path for a store file
pub fn write_log_path(store_file: &Path) -> PathBuf {
    let mut name = OsString::from(store_file.as_os_str());
    name.push(WRITELOG_SUFFIX);
    PathBuf::from(name)
}

/// Rotated write log path for a store file and timestamp
pub fn rotated_write_log_path(store_file: &Path, epoch_millis: u64) -> PathBuf {
    let mut name = OsString::from(write_log_path(store_file).as_os_str());
    name.push(format!("-{}", epoch_millis));
    PathBuf::from(name)
}

/// Rotated write logs of a store file, oldest first, with their timestamps
pub fn rotated_write_logs(store_file: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let live = write_log_path(store_file);
    let Some(live_name) = live.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(Vec::new());
    };
    let dir = match live.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let read_dir = match fs::read_dir(&dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let prefix = format!("{}-", live_name);
    let mut rotated = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(millis) = name.strip_prefix(&prefix).and_then(|s| s.parse::<u64>().ok()) {
            rotated.push((millis, entry.path()));
        }
    }
    rotated.sort();
    Ok(rotated)
}

/// All write log files of a store file in chronological order:
/// rotated files by timestamp, then the live file if present
pub fn write_log_files(store_file: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = rotated_write_logs(store_file)?
        .into_iter()
        .map(|(_, path)| path)
        .collect();
    let live = write_log_path(store_file);
    if live.exists() {
        files.push(live);
    }
    Ok(files)
}
