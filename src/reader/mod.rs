//! Reader Module
//!
//! Query side of the index. Every reader opens its own seek cursors on the
//! tree and never blocks the writer.
//!
//! - [`TokenScanReader::entities_with_token`]: all entities of one token
//! - [`TokenScanReader::entities_with_any_of_tokens`]: union over tokens
//! - [`TokenScanReader::entity_token_scan`]: ordered and batched scans
//! - [`AllEntriesReader`]: every range across all tokens, for dumps and checks

mod all_entries;
mod entity_iter;
mod scan;
mod union;

use crate::layout::{MAX_ENTITY_ID, RANGE_SIZE};
use crate::tree::{SeekDirection, Tree};

pub use all_entries::{AllEntriesReader, EntityTokenRange};
pub use entity_iter::EntityIdIterator;
pub use scan::TokenScan;
pub use union::UnionIterator;

/// Exclusive upper bound covering every representable entity id
pub const ENTITY_ID_END: u64 = MAX_ENTITY_ID + 1;

/// Order in which a scan returns entity ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrder {
    /// Caller does not care; ascending in practice
    None,
    Ascending,
    Descending,
}

/// Read access to one token scan tree
pub struct TokenScanReader<'a> {
    tree: &'a Tree,
}

impl<'a> TokenScanReader<'a> {
    pub fn new(tree: &'a Tree) -> Self {
        Self { tree }
    }

    /// Entities carrying `token_id`, ascending
    pub fn entities_with_token(&self, token_id: u32) -> EntityIdIterator<'a> {
        EntityIdIterator::new(self.tree, token_id, 0, ENTITY_ID_END, SeekDirection::Forward)
    }

    /// Entities carrying any of `token_ids`, ascending and without duplicates
    pub fn entities_with_any_of_tokens(&self, token_ids: &[u32]) -> UnionIterator<'a> {
        self.union_from(0, token_ids)
    }

    /// Like [`entities_with_any_of_tokens`](Self::entities_with_any_of_tokens),
    /// restricted to ids greater than `from_exclusive`
    pub fn entities_with_any_of_tokens_from(
        &self,
        from_exclusive: u64,
        token_ids: &[u32],
    ) -> UnionIterator<'a> {
        self.union_from(from_exclusive.saturating_add(1), token_ids)
    }

    fn union_from(&self, from_inclusive: u64, token_ids: &[u32]) -> UnionIterator<'a> {
        let iterators = token_ids
            .iter()
            .map(|&token_id| {
                EntityIdIterator::new(
                    self.tree,
                    token_id,
                    from_inclusive,
                    ENTITY_ID_END,
                    SeekDirection::Forward,
                )
            })
            .collect();
        UnionIterator::new(iterators)
    }

    /// Open a scan session over one token, for ordered or parallel scans
    pub fn entity_token_scan(&self, token_id: u32) -> TokenScan<'a> {
        TokenScan::new(self.tree, token_id)
    }

    /// Every non-empty range across all tokens
    pub fn all_entity_token_ranges(&self) -> AllEntriesReader<'a> {
        AllEntriesReader::new(self.tree, 0, ENTITY_ID_END)
    }

    /// Every non-empty range across all tokens, limited to `[from, to)`
    pub fn all_entity_token_ranges_between(&self, from: u64, to: u64) -> AllEntriesReader<'a> {
        AllEntriesReader::new(self.tree, from, to)
    }
}

/// Keep only the bits of entities in `[from, to)` for a range starting at `base`
pub(crate) fn mask_bits(bits: u64, base: u64, from: u64, to: u64) -> u64 {
    let mut bits = bits;
    if from > base {
        let skip = from - base;
        bits = if skip >= RANGE_SIZE { 0 } else { bits & (u64::MAX << skip) };
    }
    if to < base + RANGE_SIZE {
        let keep = to.saturating_sub(base);
        bits = if keep == 0 { 0 } else { bits & (u64::MAX >> (RANGE_SIZE - keep)) };
    }
    bits
}
