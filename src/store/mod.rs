//! Store Module
//!
//! Lifecycle of one token scan store: open or create the tree file, detect
//! whether a rebuild is needed, rebuild from the full store change stream,
//! hand out writers and readers, checkpoint, shut down.
//!
//! ## State Machine
//! ```text
//!   Uninitialized ──init──► Clean ─────────────┐
//!         │                   ▲                │
//!         └──init──► NeedsRebuild ──start──────┤ (rebuild)
//!                                              ▼
//!                              shutdown / drop_store ──► Closed
//! ```
//!
//! A store that is initialized but never started keeps the
//! `NeedsRebuilding` marker in its file, so the rebuild restarts on the next
//! open.

mod header;
mod monitor;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Config, EntityType};
use crate::error::{Result, ScanStoreError};
use crate::reader::{AllEntriesReader, TokenScanReader};
use crate::tree::{ConsistencyVisitor, IoLimiter, Tree};
use crate::update::FullStoreChangeStream;
use crate::writelog::{NoopWriteMonitor, WriteLog, WriteMonitor};
use crate::writer::{BulkAppendWriter, TokenScanWriter, TransactionalWriter};

pub use header::{RebuildState, StoreHeader};
pub use monitor::{LoggingMonitor, ScanStoreMonitor};

/// Lifecycle state of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    Clean,
    NeedsRebuild,
    Closed,
}

/// Token scan store: the index of which entities carry which tokens.
///
/// ## Concurrency:
/// - Lifecycle methods (`init`, `start`, `shutdown`) take `&mut self`
/// - Readers and writers borrow `&self`; any number of readers run alongside
///   the single writer
/// - `force` must not run concurrently with a writer close
pub struct TokenScanStore {
    config: Config,
    store_file: PathBuf,
    stream: Box<dyn FullStoreChangeStream>,
    monitor: Arc<dyn ScanStoreMonitor>,
    write_monitor: Arc<dyn WriteMonitor>,
    tree: Option<Tree>,
    state: StoreState,
}

impl TokenScanStore {
    /// Create an uninitialized store; call [`init`](Self::init) and
    /// [`start`](Self::start) before use, or use [`open`](Self::open)
    pub fn new(config: Config, stream: impl FullStoreChangeStream + 'static) -> Self {
        let store_file = config.store_file();
        let monitor = Arc::new(LoggingMonitor::new(config.entity_type.store_name()));

        Self {
            config,
            store_file,
            stream: Box::new(stream),
            monitor,
            write_monitor: Arc::new(NoopWriteMonitor),
            tree: None,
            state: StoreState::Uninitialized,
        }
    }

    /// Replace the lifecycle monitor
    pub fn with_monitor(mut self, monitor: Arc<dyn ScanStoreMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Create, initialize and start a store
    pub fn open(config: Config, stream: impl FullStoreChangeStream + 'static) -> Result<Self> {
        let mut store = Self::new(config, stream);
        store.init()?;
        store.start()?;
        Ok(store)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the store file, or create it when missing or unusable
    pub fn init(&mut self) -> Result<()> {
        if self.state != StoreState::Uninitialized {
            return Err(ScanStoreError::IllegalState(format!(
                "init called on a store in state {:?}",
                self.state
            )));
        }
        self.monitor.init();

        let (tree, needs_rebuild) = if self.config.read_only {
            self.open_read_only()?
        } else {
            fs::create_dir_all(&self.config.store_dir)?;
            self.open_or_create()?
        };

        if self.config.write_log.enabled && !self.config.read_only {
            self.write_monitor = Arc::new(WriteLog::open(&self.store_file, self.config.write_log)?);
        }

        self.tree = Some(tree);
        self.state = if needs_rebuild {
            StoreState::NeedsRebuild
        } else {
            StoreState::Clean
        };

        debug!(
            store = self.name(),
            path = %self.store_file.display(),
            state = ?self.state,
            "initialized scan store"
        );
        Ok(())
    }

    /// Returns the tree and whether it is degraded
    fn open_read_only(&self) -> Result<(Tree, bool)> {
        match Tree::open(&self.store_file) {
            Ok(tree) => match StoreHeader::decode(&tree.header()) {
                Ok(header) if header.state == RebuildState::Clean => Ok((tree, false)),
                Ok(_) => Err(ScanStoreError::NeedsRebuildReadOnly {
                    name: self.name(),
                    path: self.store_file.clone(),
                }),
                Err(e) => Ok((self.degraded(&e), true)),
            },
            Err(ScanStoreError::TreeFileNotFound(_)) => Err(ScanStoreError::StoreNotFound {
                name: self.name(),
                path: self.store_file.clone(),
            }),
            Err(e) if e.is_structural() => Ok((self.degraded(&e), true)),
            Err(e) => Err(e),
        }
    }

    fn degraded(&self, cause: &ScanStoreError) -> Tree {
        self.monitor.not_valid_index();
        warn!(
            store = self.name(),
            path = %self.store_file.display(),
            error = %cause,
            "scan store is corrupt and read only; serving an empty index"
        );
        Tree::degraded(&self.store_file)
    }

    /// Returns the tree and whether it must be rebuilt
    fn open_or_create(&self) -> Result<(Tree, bool)> {
        let opened = Tree::open(&self.store_file).and_then(|tree| {
            let header = StoreHeader::decode(&tree.header())?;
            if header.entity_type != self.config.entity_type {
                return Err(ScanStoreError::MetadataMismatch(format!(
                    "store file indexes {:?}, expected {:?}",
                    header.entity_type, self.config.entity_type
                )));
            }
            Ok((tree, header.state))
        });

        match opened {
            Ok((tree, RebuildState::Clean)) => Ok((tree, false)),
            Ok((tree, RebuildState::NeedsRebuilding)) => {
                info!(store = self.name(), "previous rebuild did not complete, rebuilding again");
                self.monitor.not_valid_index();
                drop(tree);
                Ok((self.create_for_rebuild()?, true))
            }
            Err(ScanStoreError::TreeFileNotFound(_)) => {
                self.monitor.no_index();
                Ok((self.create_for_rebuild()?, true))
            }
            Err(e) if e.is_structural() => {
                warn!(store = self.name(), error = %e, "unusable scan store file");
                self.monitor.not_valid_index();
                Ok((self.create_for_rebuild()?, true))
            }
            Err(e) => Err(e),
        }
    }

    fn create_for_rebuild(&self) -> Result<Tree> {
        let header = StoreHeader::new(RebuildState::NeedsRebuilding, self.config.entity_type);
        Tree::create(&self.store_file, &header.encode()?)
    }

    /// Rebuild from the full store change stream if needed
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            StoreState::Clean => return Ok(()),
            StoreState::NeedsRebuild if self.config.read_only => {
                warn!(
                    store = self.name(),
                    "scan store needs rebuilding but is read only; reads will be incomplete"
                );
                return Ok(());
            }
            StoreState::NeedsRebuild => {}
            other => {
                return Err(ScanStoreError::IllegalState(format!(
                    "start called on a store in state {:?}",
                    other
                )));
            }
        }

        self.monitor.rebuilding();
        let updates = {
            let tree = self.tree()?;
            let mut writer = BulkAppendWriter::new(tree.writer()?, self.write_monitor.as_ref());
            let updates = self.stream.apply_to(&mut writer)?;
            writer.close()?;

            let header = StoreHeader::new(RebuildState::Clean, self.config.entity_type);
            tree.checkpoint(&IoLimiter::UNLIMITED, &header.encode()?)?;
            updates
        };
        self.monitor.rebuilt(updates);

        self.state = StoreState::Clean;
        Ok(())
    }

    /// Checkpoint the tree and force the write log
    pub fn force(&self, limiter: &IoLimiter) -> Result<()> {
        if self.config.read_only {
            return Ok(());
        }
        let tree = self.tree()?;
        tree.checkpoint(limiter, &self.current_header()?)?;
        self.write_monitor.force()
    }

    /// Final checkpoint, then release the tree and the write log
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == StoreState::Closed {
            return Ok(());
        }

        if let Some(tree) = self.tree.as_ref() {
            if !self.config.read_only {
                tree.checkpoint(&IoLimiter::UNLIMITED, &self.current_header()?)?;
            }
        }
        self.write_monitor.close()?;

        self.tree = None;
        self.state = StoreState::Closed;
        debug!(store = self.name(), "scan store shut down");
        Ok(())
    }

    /// Close the store and delete its file
    pub fn drop_store(&mut self) -> Result<()> {
        self.write_monitor.close()?;
        self.tree = None;
        self.state = StoreState::Closed;

        match fs::remove_file(&self.store_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(store = self.name(), path = %self.store_file.display(), "dropped scan store");
        Ok(())
    }

    // =========================================================================
    // Writers and Readers
    // =========================================================================

    /// Writer for transaction updates; one at a time
    pub fn new_writer(&self) -> Result<TransactionalWriter<'_>> {
        let tree = self.writable_tree()?;
        Ok(TransactionalWriter::new(tree.writer()?, self.write_monitor.as_ref()))
    }

    /// Writer for sorted, add-only population
    pub fn new_bulk_append_writer(&self) -> Result<BulkAppendWriter<'_>> {
        let tree = self.writable_tree()?;
        Ok(BulkAppendWriter::new(tree.writer()?, self.write_monitor.as_ref()))
    }

    pub fn new_reader(&self) -> Result<TokenScanReader<'_>> {
        Ok(TokenScanReader::new(self.tree()?))
    }

    /// Every non-empty range across all tokens, ascending
    pub fn all_entity_token_ranges(&self) -> Result<AllEntriesReader<'_>> {
        Ok(self.new_reader()?.all_entity_token_ranges())
    }

    /// Like [`all_entity_token_ranges`](Self::all_entity_token_ranges),
    /// limited to entities in `[from, to)`
    pub fn all_entity_token_ranges_between(&self, from: u64, to: u64) -> Result<AllEntriesReader<'_>> {
        Ok(self.new_reader()?.all_entity_token_ranges_between(from, to))
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// True iff a full seek yields no entries.
    ///
    /// Zero bitmaps left behind by removals are entries, so a store that had
    /// tokens removed again is not empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.tree()?.seek_all().next().is_none())
    }

    /// Check the tree; problems go to `visitor`. Returns `true` when clean.
    pub fn consistency_check(&self, visitor: &mut dyn ConsistencyVisitor) -> Result<bool> {
        self.tree()?.consistency_check(visitor)
    }

    /// Files making up the store, for backups
    pub fn snapshot_store_files(&self) -> Result<Vec<PathBuf>> {
        let tree = self.tree()?;
        if tree.is_persistent() && tree.path().exists() {
            Ok(vec![tree.path().to_path_buf()])
        } else {
            Ok(Vec::new())
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.config.entity_type
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn needs_rebuild(&self) -> bool {
        self.state == StoreState::NeedsRebuild
    }

    /// Path of the store file
    pub fn path(&self) -> &Path {
        &self.store_file
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn name(&self) -> &'static str {
        self.config.entity_type.store_name()
    }

    fn tree(&self) -> Result<&Tree> {
        self.tree.as_ref().ok_or_else(|| {
            ScanStoreError::IllegalState(format!("{} is not initialized", self.name()))
        })
    }

    fn writable_tree(&self) -> Result<&Tree> {
        if self.config.read_only {
            return Err(ScanStoreError::ReadOnly(self.name()));
        }
        self.tree()
    }

    fn current_header(&self) -> Result<Vec<u8>> {
        let state = if self.state == StoreState::NeedsRebuild {
            RebuildState::NeedsRebuilding
        } else {
            RebuildState::Clean
        };
        StoreHeader::new(state, self.config.entity_type).encode()
    }
}

impl Drop for TokenScanStore {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(store = self.name(), error = %e, "failed to shut down scan store");
        }
    }
}
