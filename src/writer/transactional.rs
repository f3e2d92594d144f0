//! Transactional writer
//!
//! Buffers every token change of a session, then on close sorts them by
//! token and entity, folds them into one add and one remove delta per
//! (token, range) and merges those into the tree.

use tracing::{debug, warn};

use crate::error::{Result, ScanStoreError};
use crate::layout::{offset_of, range_of, TokenScanKey, TokenScanValue, MAX_ENTITY_ID};
use crate::merge::MergePolicy;
use crate::tree::TreeWriter;
use crate::update::EntityTokenUpdate;
use crate::writelog::WriteMonitor;

use super::TokenScanWriter;

/// One token gained or lost by one entity
#[derive(Debug, Clone, Copy)]
struct PendingChange {
    token_id: u32,
    entity_id: u64,
    tx_id: u64,
    add: bool,
}

/// Deltas of one (token, range) bucket
struct Bucket {
    key: TokenScanKey,
    adds: TokenScanValue,
    removes: TokenScanValue,
}

impl Bucket {
    fn new(key: TokenScanKey) -> Self {
        Self {
            key,
            adds: TokenScanValue::default(),
            removes: TokenScanValue::default(),
        }
    }

    /// Later changes of the same entity override earlier ones
    fn apply(&mut self, change: &PendingChange) {
        if change.add {
            self.adds.set(change.entity_id);
            self.removes.unset(change.entity_id);
        } else {
            self.removes.set(change.entity_id);
            self.adds.unset(change.entity_id);
        }
    }
}

/// General purpose writer for incremental updates
pub struct TransactionalWriter<'a> {
    tree_writer: Option<TreeWriter<'a>>,
    monitor: &'a dyn WriteMonitor,
    pending: Vec<PendingChange>,
}

impl<'a> TransactionalWriter<'a> {
    pub(crate) fn new(tree_writer: TreeWriter<'a>, monitor: &'a dyn WriteMonitor) -> Self {
        Self {
            tree_writer: Some(tree_writer),
            monitor,
            pending: Vec::new(),
        }
    }

    /// Number of token changes waiting for close
    pub fn pending_changes(&self) -> usize {
        self.pending.len()
    }

    fn merge_pending(&mut self, tree_writer: &mut TreeWriter<'a>) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        self.monitor.flushed();

        // Stable: changes to the same (token, entity) stay in write order
        self.pending.sort_by_key(|c| (c.token_id, c.entity_id));

        let mut buckets = 0;
        let mut current: Option<Bucket> = None;
        for change in &self.pending {
            let key = TokenScanKey::new(change.token_id, range_of(change.entity_id));
            if current.as_ref().map(|b| b.key) != Some(key) {
                if let Some(done) = current.take() {
                    merge_bucket(tree_writer, &done, self.monitor)?;
                    buckets += 1;
                }
                self.monitor.range(key.id_range, key.token_id);
                current = Some(Bucket::new(key));
            }

            let offset = offset_of(change.entity_id);
            if change.add {
                self.monitor.prepare_add(change.tx_id, offset);
            } else {
                self.monitor.prepare_remove(change.tx_id, offset);
            }
            if let Some(bucket) = current.as_mut() {
                bucket.apply(change);
            }
        }
        if let Some(done) = current.take() {
            merge_bucket(tree_writer, &done, self.monitor)?;
            buckets += 1;
        }

        self.pending.clear();
        Ok(buckets)
    }
}

fn merge_bucket(
    tree_writer: &mut TreeWriter<'_>,
    bucket: &Bucket,
    monitor: &dyn WriteMonitor,
) -> Result<()> {
    if !bucket.adds.is_empty() {
        tree_writer.merge(bucket.key, bucket.adds, MergePolicy::Add, monitor)?;
    }
    if !bucket.removes.is_empty() {
        tree_writer.merge(bucket.key, bucket.removes, MergePolicy::Remove, monitor)?;
    }
    Ok(())
}

impl TokenScanWriter for TransactionalWriter<'_> {
    fn write(&mut self, update: &EntityTokenUpdate) -> Result<()> {
        if self.tree_writer.is_none() {
            return Err(ScanStoreError::IllegalState(
                "write to a closed token scan writer".to_string(),
            ));
        }

        let entity_id = update.entity_id();
        if entity_id > MAX_ENTITY_ID {
            return Err(ScanStoreError::EntityIdOutOfRange(entity_id));
        }

        let tx_id = update.tx_id();
        for token_id in update.added() {
            self.pending.push(PendingChange {
                token_id,
                entity_id,
                tx_id,
                add: true,
            });
        }
        for token_id in update.removed() {
            self.pending.push(PendingChange {
                token_id,
                entity_id,
                tx_id,
                add: false,
            });
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut tree_writer) = self.tree_writer.take() else {
            return Ok(());
        };

        let changes = self.pending.len();
        let buckets = self.merge_pending(&mut tree_writer)?;
        tree_writer.close()?;
        self.monitor.session_ended();

        if changes > 0 {
            debug!(changes, buckets, "merged token scan writer session");
        }
        Ok(())
    }
}

impl Drop for TransactionalWriter<'_> {
    fn drop(&mut self) {
        if self.tree_writer.is_some() && !self.pending.is_empty() {
            warn!(
                discarded = self.pending.len(),
                "token scan writer dropped without close, pending changes discarded"
            );
        }
    }
}
