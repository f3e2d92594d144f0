//! Token scan session
//!
//! Supports whole-token scans in a chosen order and parallel scans where
//! each thread claims a disjoint slice of the id space. The claim counter is
//! owned by the session, so two sessions over the same token never interfere.

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use crate::layout::{first_entity_of, TokenScanKey, RANGE_SIZE};
use crate::tree::{SeekDirection, Tree};

use super::{EntityIdIterator, IndexOrder, ENTITY_ID_END};

/// Scan session over one token
pub struct TokenScan<'a> {
    tree: &'a Tree,
    token_id: u32,
    /// Highest entity id carrying the token when the session opened
    highest: Option<u64>,
    /// Start of the next unclaimed batch
    next_start: CachePadded<AtomicU64>,
}

impl<'a> TokenScan<'a> {
    pub(crate) fn new(tree: &'a Tree, token_id: u32) -> Self {
        let highest = tree
            .seek(
                Bound::Included(TokenScanKey::lowest_of(token_id)),
                Bound::Included(TokenScanKey::highest_of(token_id)),
                SeekDirection::Backward,
            )
            .find(|(_, value)| !value.is_empty())
            .map(|(key, value)| {
                first_entity_of(key.id_range) + (63 - value.bits.leading_zeros()) as u64
            });

        Self {
            tree,
            token_id,
            highest,
            next_start: CachePadded::new(AtomicU64::new(0)),
        }
    }

    pub fn token_id(&self) -> u32 {
        self.token_id
    }

    /// Highest entity id seen when the session opened
    pub fn highest_entity_id(&self) -> Option<u64> {
        self.highest
    }

    /// Claim the next slice of at least `size_hint` ids (a whole number of
    /// ranges) and iterate the entities in it.
    ///
    /// Safe to call from many threads; returns `None` once every id up to
    /// the highest entity has been claimed.
    pub fn initialize_batch(&self, size_hint: u64) -> Option<EntityIdIterator<'a>> {
        let highest = self.highest?;
        let limit = highest + 1;
        let size = size_hint
            .max(1)
            .div_ceil(RANGE_SIZE)
            .checked_mul(RANGE_SIZE)
            .unwrap_or(u64::MAX);

        // Claims never move past the end, so the counter cannot wrap
        let start = self
            .next_start
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |start| {
                (start < limit).then(|| start.saturating_add(size).min(limit))
            })
            .ok()?;

        let end = start.saturating_add(size).min(limit);
        Some(EntityIdIterator::new(
            self.tree,
            self.token_id,
            start,
            end,
            SeekDirection::Forward,
        ))
    }

    /// Iterate every entity of the token in `order`
    pub fn initialize(&self, order: IndexOrder) -> EntityIdIterator<'a> {
        let direction = match order {
            IndexOrder::None | IndexOrder::Ascending => SeekDirection::Forward,
            IndexOrder::Descending => SeekDirection::Backward,
        };
        EntityIdIterator::new(self.tree, self.token_id, 0, ENTITY_ID_END, direction)
    }
}
