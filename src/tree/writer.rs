//! Tree writer
//!
//! The single serialization point for mutations. Only one writer can be open
//! per tree; dropping it without `close` still releases the slot.

use tracing::trace;

use crate::error::Result;
use crate::layout::{TokenScanKey, TokenScanValue};
use crate::merge::MergePolicy;
use crate::writelog::WriteMonitor;

use super::Tree;

/// Exclusive, merge-capable writer over a tree
pub struct TreeWriter<'a> {
    tree: &'a Tree,
    /// Merges applied by this writer
    merged: u64,
    closed: bool,
}

impl<'a> TreeWriter<'a> {
    pub(super) fn new(tree: &'a Tree) -> Self {
        Self {
            tree,
            merged: 0,
            closed: false,
        }
    }

    /// Merge `delta` into the entry at `key` under `policy`.
    ///
    /// A missing entry is created only if the policy asks for it.
    pub fn merge(
        &mut self,
        key: TokenScanKey,
        delta: TokenScanValue,
        policy: MergePolicy,
        monitor: &dyn WriteMonitor,
    ) -> Result<()> {
        let mut entries = self.tree.entries().write();
        match entries.get_mut(&key) {
            Some(existing) => {
                policy.merge(existing, &delta, monitor);
            }
            None => {
                if let Some(value) = policy.on_absent(&delta) {
                    entries.insert(key, value);
                }
            }
        }
        self.merged += 1;
        Ok(())
    }

    /// Number of merges applied so far
    pub fn merged(&self) -> u64 {
        self.merged
    }

    /// Release the writer slot
    pub fn close(mut self) -> Result<()> {
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.tree.release_writer();
            trace!(merged = self.merged, "tree writer released");
        }
    }
}

impl Drop for TreeWriter<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
