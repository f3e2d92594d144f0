//! Merge policy
//!
//! Combines a delta with the value already stored under the same key. The
//! stored record is always kept and mutated in place; nothing is ever copied
//! or deleted, so replaying a delta that is already durable is harmless.

use crate::layout::TokenScanValue;
use crate::writelog::WriteMonitor;

/// Outcome of merging a delta into an existing value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueMerge {
    /// Existing value was updated in place
    Merged,
}

/// How a delta is applied to the stored bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Set the delta's bits
    Add,

    /// Clear the delta's bits
    Remove,
}

impl MergePolicy {
    /// Merge `delta` into `existing`.
    ///
    /// The monitor sees both values before mutation.
    pub fn merge(
        &self,
        existing: &mut TokenScanValue,
        delta: &TokenScanValue,
        monitor: &dyn WriteMonitor,
    ) -> ValueMerge {
        match self {
            MergePolicy::Add => {
                monitor.merge_add(existing, delta);
                existing.add(delta);
            }
            MergePolicy::Remove => {
                monitor.merge_remove(existing, delta);
                existing.remove(delta);
            }
        }
        ValueMerge::Merged
    }

    /// Value to insert when no entry exists yet for the key.
    ///
    /// Removing bits from a missing entry has nothing to do.
    pub fn on_absent(&self, delta: &TokenScanValue) -> Option<TokenScanValue> {
        match self {
            MergePolicy::Add => Some(*delta),
            MergePolicy::Remove => None,
        }
    }
}
