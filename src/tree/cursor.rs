//! Seek cursor
//!
//! Walks a key range of the tree in either direction. Entries are pulled in
//! small batches under a short read lock; between batches the cursor only
//! remembers the last key it returned, so a writer can merge freely while a
//! scan is in flight and each key is seen either before or after a merge,
//! never torn.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;

use parking_lot::RwLock;

use crate::layout::{TokenScanKey, TokenScanValue};

/// Entries fetched per lock acquisition
const BATCH_SIZE: usize = 64;

/// Direction of a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDirection {
    /// Ascending key order
    Forward,

    /// Descending key order
    Backward,
}

/// Lazy cursor over `(key, value)` pairs
pub struct SeekCursor<'a> {
    entries: &'a RwLock<BTreeMap<TokenScanKey, TokenScanValue>>,
    lower: Bound<TokenScanKey>,
    upper: Bound<TokenScanKey>,
    direction: SeekDirection,
    /// Prefetched entries, in iteration order
    batch: VecDeque<(TokenScanKey, TokenScanValue)>,
    /// No more entries remain in the tree beyond `batch`
    exhausted: bool,
}

impl<'a> SeekCursor<'a> {
    pub(super) fn new(
        entries: &'a RwLock<BTreeMap<TokenScanKey, TokenScanValue>>,
        lower: Bound<TokenScanKey>,
        upper: Bound<TokenScanKey>,
        direction: SeekDirection,
    ) -> Self {
        Self {
            entries,
            lower,
            upper,
            direction,
            batch: VecDeque::with_capacity(BATCH_SIZE),
            exhausted: false,
        }
    }

    pub fn direction(&self) -> SeekDirection {
        self.direction
    }

    /// Fetch the next batch, narrowing the bounds past what was fetched
    fn refill(&mut self) {
        if bounds_empty(&self.lower, &self.upper) {
            self.exhausted = true;
            return;
        }

        let lock = self.entries;
        let entries = lock.read();
        let range = entries.range((self.lower, self.upper));
        match self.direction {
            SeekDirection::Forward => {
                self.batch.extend(range.take(BATCH_SIZE).map(|(k, v)| (*k, *v)));
                if let Some((last, _)) = self.batch.back() {
                    self.lower = Bound::Excluded(*last);
                }
            }
            SeekDirection::Backward => {
                self.batch.extend(range.rev().take(BATCH_SIZE).map(|(k, v)| (*k, *v)));
                if let Some((last, _)) = self.batch.back() {
                    self.upper = Bound::Excluded(*last);
                }
            }
        }

        if self.batch.len() < BATCH_SIZE {
            self.exhausted = true;
        }
    }
}

impl Iterator for SeekCursor<'_> {
    type Item = (TokenScanKey, TokenScanValue);

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch.is_empty() {
            if self.exhausted {
                return None;
            }
            self.refill();
        }
        self.batch.pop_front()
    }
}

/// True when no key can satisfy both bounds.
///
/// `BTreeMap::range` panics on inverted bounds, so they are caught here.
fn bounds_empty(lower: &Bound<TokenScanKey>, upper: &Bound<TokenScanKey>) -> bool {
    match (lower, upper) {
        (Bound::Included(a), Bound::Included(b)) => a > b,
        (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b))
        | (Bound::Excluded(a), Bound::Excluded(b)) => a >= b,
        _ => false,
    }
}
