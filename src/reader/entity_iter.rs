//! Entity id iterator
//!
//! Expands the bitmaps of one token into entity ids. Ascending scans take
//! the lowest remaining bit of each bitmap (trailing zeros), descending scans
//! the highest (leading zeros), so ids come out strictly monotonic.

use std::ops::Bound;

use crate::layout::{first_entity_of, range_of, TokenScanKey};
use crate::tree::{SeekCursor, SeekDirection, Tree};

use super::mask_bits;

/// Lazy, forward-only sequence of entity ids for one token.
///
/// Exhausted once; reopen to restart.
///
/// # Panics
///
/// Panics if the tree hands back ranges out of scan order.
pub struct EntityIdIterator<'a> {
    cursor: Option<SeekCursor<'a>>,
    direction: SeekDirection,
    /// Inclusive lower entity bound
    from: u64,
    /// Exclusive upper entity bound
    to: u64,
    /// First entity id of the current range
    base: u64,
    /// Remaining bits of the current range
    bits: u64,
    previous_range: Option<u64>,
}

impl<'a> EntityIdIterator<'a> {
    /// Entities of `token_id` in `[from, to)`, walked in `direction`
    pub(crate) fn new(
        tree: &'a Tree,
        token_id: u32,
        from: u64,
        to: u64,
        direction: SeekDirection,
    ) -> Self {
        let cursor = (from < to).then(|| {
            let lower = TokenScanKey::new(token_id, range_of(from));
            let upper = TokenScanKey::new(token_id, range_of(to - 1));
            tree.seek(Bound::Included(lower), Bound::Included(upper), direction)
        });

        Self {
            cursor,
            direction,
            from,
            to,
            base: 0,
            bits: 0,
            previous_range: None,
        }
    }

    /// An iterator that yields nothing
    pub fn empty() -> Self {
        Self {
            cursor: None,
            direction: SeekDirection::Forward,
            from: 0,
            to: 0,
            base: 0,
            bits: 0,
            previous_range: None,
        }
    }

    /// Move to the next range with entities in bounds
    fn advance_range(&mut self) -> bool {
        let Some(cursor) = self.cursor.as_mut() else {
            return false;
        };

        for (key, value) in cursor.by_ref() {
            if let Some(previous) = self.previous_range {
                match self.direction {
                    SeekDirection::Forward => assert!(
                        key.id_range > previous,
                        "token scan out of order: range {} after {} ascending",
                        key.id_range,
                        previous
                    ),
                    SeekDirection::Backward => assert!(
                        key.id_range < previous,
                        "token scan out of order: range {} after {} descending",
                        key.id_range,
                        previous
                    ),
                }
            }
            self.previous_range = Some(key.id_range);

            self.base = first_entity_of(key.id_range);
            self.bits = mask_bits(value.bits, self.base, self.from, self.to);
            if self.bits != 0 {
                return true;
            }
        }

        self.cursor = None;
        false
    }
}

impl Iterator for EntityIdIterator<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.bits == 0 && !self.advance_range() {
            return None;
        }

        let offset = match self.direction {
            SeekDirection::Forward => self.bits.trailing_zeros(),
            SeekDirection::Backward => 63 - self.bits.leading_zeros(),
        };
        self.bits &= !(1u64 << offset);
        Some(self.base + offset as u64)
    }
}
