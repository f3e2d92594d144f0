//! Bulk append writer
//!
//! Streaming grouped merge for initial population. Because updates arrive
//! in ascending entity order, each token only ever has one range in progress:
//! once an update lands in a later range, the previous one is complete and is
//! merged straight away, without re-reading anything.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Result, ScanStoreError};
use crate::layout::{range_of, TokenScanKey, TokenScanValue, MAX_ENTITY_ID};
use crate::merge::MergePolicy;
use crate::tree::TreeWriter;
use crate::update::EntityTokenUpdate;
use crate::writelog::WriteMonitor;

use super::TokenScanWriter;

/// Writer for sorted, add-only population streams
pub struct BulkAppendWriter<'a> {
    tree_writer: Option<TreeWriter<'a>>,
    monitor: &'a dyn WriteMonitor,
    /// Range in progress and its bits, per token id
    in_progress: BTreeMap<u32, (u64, TokenScanValue)>,
    last_entity: Option<u64>,
    updates: u64,
}

impl<'a> BulkAppendWriter<'a> {
    pub(crate) fn new(tree_writer: TreeWriter<'a>, monitor: &'a dyn WriteMonitor) -> Self {
        Self {
            tree_writer: Some(tree_writer),
            monitor,
            in_progress: BTreeMap::new(),
            last_entity: None,
            updates: 0,
        }
    }

    /// Updates accepted so far
    pub fn updates(&self) -> u64 {
        self.updates
    }

    fn check_preconditions(&self, update: &EntityTokenUpdate) -> Result<()> {
        if !update.tokens_before().is_empty() {
            return Err(ScanStoreError::Precondition(format!(
                "bulk append writer only accepts entities without previous tokens, got {}",
                update
            )));
        }

        if let Some(last) = self.last_entity {
            if update.entity_id() <= last {
                return Err(ScanStoreError::Precondition(format!(
                    "bulk append writer needs strictly increasing entity ids, got {} after entity {}",
                    update, last
                )));
            }
        }

        if update.tokens_after().windows(2).any(|w| w[0] >= w[1]) {
            return Err(ScanStoreError::Precondition(format!(
                "bulk append writer needs strictly ascending token ids, got {}",
                update
            )));
        }

        if update.entity_id() > MAX_ENTITY_ID {
            return Err(ScanStoreError::EntityIdOutOfRange(update.entity_id()));
        }
        Ok(())
    }
}

fn flush_range(
    tree_writer: &mut TreeWriter<'_>,
    monitor: &dyn WriteMonitor,
    token_id: u32,
    id_range: u64,
    value: TokenScanValue,
) -> Result<()> {
    monitor.range(id_range, token_id);
    tree_writer.merge(
        TokenScanKey::new(token_id, id_range),
        value,
        MergePolicy::Add,
        monitor,
    )
}

impl TokenScanWriter for BulkAppendWriter<'_> {
    fn write(&mut self, update: &EntityTokenUpdate) -> Result<()> {
        self.check_preconditions(update)?;
        let Some(tree_writer) = self.tree_writer.as_mut() else {
            return Err(ScanStoreError::IllegalState(
                "write to a closed bulk append writer".to_string(),
            ));
        };

        let entity_id = update.entity_id();
        let id_range = range_of(entity_id);
        for &token_id in update.tokens_after() {
            match self.in_progress.get_mut(&token_id) {
                Some((range, value)) if *range == id_range => value.set(entity_id),
                Some((range, value)) => {
                    flush_range(tree_writer, self.monitor, token_id, *range, *value)?;
                    *range = id_range;
                    *value = TokenScanValue::of_entity(entity_id);
                }
                None => {
                    self.in_progress
                        .insert(token_id, (id_range, TokenScanValue::of_entity(entity_id)));
                }
            }
        }

        self.last_entity = Some(entity_id);
        self.updates += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut tree_writer) = self.tree_writer.take() else {
            return Ok(());
        };

        for (&token_id, &(id_range, value)) in &self.in_progress {
            flush_range(&mut tree_writer, self.monitor, token_id, id_range, value)?;
        }
        self.in_progress.clear();

        tree_writer.close()?;
        self.monitor.session_ended();

        debug!(updates = self.updates, "closed bulk append writer");
        Ok(())
    }
}
