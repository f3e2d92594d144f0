//! Tree Module
//!
//! Sorted key/value store backing the index. All entries live in an ordered
//! in-memory map; a checkpoint rewrites the whole file atomically. Every
//! record has the same size, so the file needs no per-entry lengths.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes + payload + 8)                         │
//! │   Magic: "TSST" (4) | Version: u16 (2)                  │
//! │   KeySize: u16 (2) | ValueSize: u16 (2)                 │
//! │   HeaderLen: u32 (4) | Header payload (HeaderLen)       │
//! │   EntryCount: u64 (8)                                   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (EntryCount * 18 bytes)                      │
//! │   [Key: 10][Value: 8]                                   │
//! │   ... ascending key order ...                           │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (8 bytes)                                        │
//! │   CRC32 of everything above (4) | Padding (4)           │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The header payload is opaque to the tree; the owning store uses it to
//! persist whether a rebuild completed.

mod cursor;
mod file;
mod limiter;
mod writer;

use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Result, ScanStoreError};
use crate::layout::{TokenScanKey, TokenScanValue, MAX_ID_RANGE};

pub use cursor::{SeekCursor, SeekDirection};
pub use limiter::IoLimiter;
pub use writer::TreeWriter;

// =============================================================================
// Shared Constants (used by file reader and writer)
// =============================================================================

/// Magic bytes identifying a token scan tree file
pub(crate) const MAGIC: &[u8; 4] = b"TSST";

/// Current tree format version
pub(crate) const VERSION: u16 = 1;

/// Fixed part of the header before the payload:
/// Magic (4) + Version (2) + KeySize (2) + ValueSize (2) + HeaderLen (4)
pub(crate) const FIXED_HEADER_SIZE: usize = 14;

/// Footer size: CRC (4) + Padding (4)
pub(crate) const FOOTER_SIZE: usize = 8;

// =============================================================================
// Tree
// =============================================================================

/// Checkpointed, sorted map from index keys to bitmap values.
///
/// ## Concurrency:
/// - `entries`: RwLock, readers take it briefly per cursor batch
/// - `writer_open`: at most one `TreeWriter` exists at a time
/// - All methods use `&self`
pub struct Tree {
    /// Path of the tree file
    path: PathBuf,

    /// All live entries in key order
    entries: RwLock<BTreeMap<TokenScanKey, TokenScanValue>>,

    /// Set while a writer is open
    writer_open: AtomicBool,

    /// Header payload of the last checkpoint
    header: Mutex<Vec<u8>>,

    /// False for a degraded tree that must never touch the file
    persistent: bool,
}

impl Tree {
    /// Create a new, empty tree and persist it with `header`
    ///
    /// Overwrites any existing file at `path`.
    pub fn create(path: &Path, header: &[u8]) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        file::write_tree_file(path, header, std::iter::empty(), 0, &IoLimiter::UNLIMITED)?;
        debug!(path = %path.display(), "created tree file");

        Ok(Self::from_parts(path, BTreeMap::new(), header.to_vec(), true))
    }

    /// Open an existing tree file
    ///
    /// Fails with `TreeFileNotFound` if the file is missing, and with
    /// `MetadataMismatch` or `Corrupted` if its structure is unusable.
    pub fn open(path: &Path) -> Result<Self> {
        let image = file::read_tree_file(path)?;
        debug!(
            path = %path.display(),
            entries = image.entries.len(),
            "opened tree file"
        );
        Ok(Self::from_parts(path, image.entries, image.header, true))
    }

    /// An empty tree that is never written to disk.
    ///
    /// Used when a corrupt file is opened read only: reads succeed but see
    /// nothing.
    pub fn degraded(path: &Path) -> Self {
        Self::from_parts(path, BTreeMap::new(), Vec::new(), false)
    }

    fn from_parts(
        path: &Path,
        entries: BTreeMap<TokenScanKey, TokenScanValue>,
        header: Vec<u8>,
        persistent: bool,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
            writer_open: AtomicBool::new(false),
            header: Mutex::new(header),
            persistent,
        }
    }

    /// Seek entries between two bounds.
    ///
    /// Ascending cursors walk from `lower` up to `upper`; descending cursors
    /// walk from `upper` down to `lower`.
    pub fn seek(
        &self,
        lower: Bound<TokenScanKey>,
        upper: Bound<TokenScanKey>,
        direction: SeekDirection,
    ) -> SeekCursor<'_> {
        SeekCursor::new(&self.entries, lower, upper, direction)
    }

    /// Seek `[from, to)` in ascending order
    pub fn seek_range(&self, from: TokenScanKey, to: TokenScanKey) -> SeekCursor<'_> {
        self.seek(Bound::Included(from), Bound::Excluded(to), SeekDirection::Forward)
    }

    /// Seek every entry in ascending order
    pub fn seek_all(&self) -> SeekCursor<'_> {
        self.seek(Bound::Unbounded, Bound::Unbounded, SeekDirection::Forward)
    }

    /// Acquire the exclusive writer
    ///
    /// Never blocks: fails with `WriterAlreadyOpen` while another writer lives.
    pub fn writer(&self) -> Result<TreeWriter<'_>> {
        if self
            .writer_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ScanStoreError::WriterAlreadyOpen);
        }
        Ok(TreeWriter::new(self))
    }

    /// Whether a writer is currently open
    pub fn has_open_writer(&self) -> bool {
        self.writer_open.load(Ordering::Acquire)
    }

    /// Persist all entries with the given header payload.
    ///
    /// The entries are snapshotted first so readers and the writer are only
    /// held off for the copy, not for the I/O. A degraded tree ignores this.
    pub fn checkpoint(&self, limiter: &IoLimiter, header: &[u8]) -> Result<()> {
        if !self.persistent {
            return Ok(());
        }

        let snapshot: Vec<(TokenScanKey, TokenScanValue)> = {
            let entries = self.entries.read();
            entries.iter().map(|(k, v)| (*k, *v)).collect()
        };

        let count = snapshot.len() as u64;
        let size = file::write_tree_file(&self.path, header, snapshot.into_iter(), count, limiter)?;
        *self.header.lock() = header.to_vec();

        debug!(path = %self.path.display(), entries = count, bytes = size, "checkpointed tree");
        Ok(())
    }

    /// Header payload of the last checkpoint (or of the opened file)
    pub fn header(&self) -> Vec<u8> {
        self.header.lock().clone()
    }

    /// True iff the tree holds no entries at all
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Path of the tree file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this tree reads and writes its file
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Check the structure of the persisted file and the live entries.
    ///
    /// Every problem is reported to `visitor`. Returns `true` when clean.
    /// Nothing is repaired.
    pub fn consistency_check(&self, visitor: &mut dyn ConsistencyVisitor) -> Result<bool> {
        let mut clean = true;

        if self.persistent {
            match file::read_tree_file(&self.path) {
                Ok(_) => {}
                Err(e) if e.is_structural() => {
                    visitor.issue(&format!("{}: {}", self.path.display(), e));
                    clean = false;
                }
                Err(ScanStoreError::TreeFileNotFound(path)) => {
                    visitor.issue(&format!("tree file missing: {}", path.display()));
                    clean = false;
                }
                Err(e) => return Err(e),
            }
        }

        let entries = self.entries.read();
        for key in entries.keys() {
            if key.id_range > MAX_ID_RANGE {
                visitor.issue(&format!("key {} has an id range beyond {}", key, MAX_ID_RANGE));
                clean = false;
            }
        }

        Ok(clean)
    }

    pub(crate) fn entries(&self) -> &RwLock<BTreeMap<TokenScanKey, TokenScanValue>> {
        &self.entries
    }

    pub(crate) fn release_writer(&self) {
        self.writer_open.store(false, Ordering::Release);
    }
}

// =============================================================================
// Consistency Reporting
// =============================================================================

/// Receives the problems found by a consistency check
pub trait ConsistencyVisitor {
    fn issue(&mut self, description: &str);
}

impl ConsistencyVisitor for Vec<String> {
    fn issue(&mut self, description: &str) {
        self.push(description.to_string());
    }
}
