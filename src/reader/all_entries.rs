//! All-entries reader
//!
//! Walks every token at once, one cursor per token present in the tree,
//! advancing them lock-step by id range. Each step aggregates the cursors
//! sitting on the lowest range into one [`EntityTokenRange`], so a range is
//! visited exactly once even when only one token has data there.

use std::fmt;
use std::iter::Peekable;
use std::ops::Bound;

use crate::layout::{first_entity_of, range_of, TokenScanKey, RANGE_SIZE};
use crate::tree::{SeekCursor, SeekDirection, Tree};

use super::mask_bits;

/// Entities of one id range with the tokens each of them carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTokenRange {
    id_range: u64,
    entities: Vec<u64>,
    /// Sorted token ids, parallel to `entities`
    tokens: Vec<Vec<u32>>,
}

impl EntityTokenRange {
    pub fn id(&self) -> u64 {
        self.id_range
    }

    /// Entity ids present in the range, ascending
    pub fn entities(&self) -> &[u64] {
        &self.entities
    }

    /// Tokens of `entity_id`; empty if the entity is not in this range
    pub fn tokens(&self, entity_id: u64) -> &[u32] {
        match self.entities.binary_search(&entity_id) {
            Ok(index) => &self.tokens[index],
            Err(_) => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl fmt::Display for EntityTokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[id:{}", self.id_range)?;
        for (entity, tokens) in self.entities.iter().zip(&self.tokens) {
            write!(f, ", {}:{:?}", entity, tokens)?;
        }
        write!(f, "]")
    }
}

/// Lock-step reader over every token
pub struct AllEntriesReader<'a> {
    cursors: Vec<(u32, Peekable<SeekCursor<'a>>)>,
    from: u64,
    to: u64,
    max_count: u64,
}

impl<'a> AllEntriesReader<'a> {
    /// Reader over entities in `[from, to)`
    pub(crate) fn new(tree: &'a Tree, from: u64, to: u64) -> Self {
        let mut cursors = Vec::new();
        let mut highest_range = None;

        if from < to {
            for token_id in tokens_present(tree) {
                let lower = TokenScanKey::new(token_id, range_of(from));
                let upper = TokenScanKey::new(token_id, range_of(to - 1));
                cursors.push((
                    token_id,
                    tree.seek(Bound::Included(lower), Bound::Included(upper), SeekDirection::Forward)
                        .peekable(),
                ));

                let last = tree
                    .seek(
                        Bound::Included(TokenScanKey::lowest_of(token_id)),
                        Bound::Included(TokenScanKey::highest_of(token_id)),
                        SeekDirection::Backward,
                    )
                    .next();
                if let Some((key, _)) = last {
                    highest_range = highest_range.max(Some(key.id_range));
                }
            }
        }

        Self {
            cursors,
            from,
            to,
            max_count: highest_range.map_or(0, |range| (range + 1) * RANGE_SIZE),
        }
    }

    /// Upper bound on the number of entity ids covered by the tree
    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    /// Lowest range any cursor is positioned at
    fn lowest_range(&mut self) -> Option<u64> {
        self.cursors
            .iter_mut()
            .filter_map(|(_, cursor)| cursor.peek().map(|(key, _)| key.id_range))
            .min()
    }
}

impl Iterator for AllEntriesReader<'_> {
    type Item = EntityTokenRange;

    fn next(&mut self) -> Option<EntityTokenRange> {
        loop {
            let id_range = self.lowest_range()?;
            let base = first_entity_of(id_range);

            let mut per_offset: Vec<Vec<u32>> = vec![Vec::new(); RANGE_SIZE as usize];
            for (token_id, cursor) in &mut self.cursors {
                let Some((_, value)) = cursor.next_if(|(key, _)| key.id_range == id_range) else {
                    continue;
                };
                let mut bits = mask_bits(value.bits, base, self.from, self.to);
                while bits != 0 {
                    let offset = bits.trailing_zeros();
                    bits &= bits - 1;
                    per_offset[offset as usize].push(*token_id);
                }
            }

            let mut entities = Vec::new();
            let mut tokens = Vec::new();
            for (offset, token_ids) in per_offset.into_iter().enumerate() {
                if !token_ids.is_empty() {
                    entities.push(base + offset as u64);
                    tokens.push(token_ids);
                }
            }

            if !entities.is_empty() {
                return Some(EntityTokenRange {
                    id_range,
                    entities,
                    tokens,
                });
            }
        }
    }
}

/// Distinct token ids with at least one entry, ascending
fn tokens_present(tree: &Tree) -> Vec<u32> {
    let mut tokens = Vec::new();
    let mut lower = TokenScanKey::lowest();
    loop {
        let first = tree
            .seek(Bound::Included(lower), Bound::Unbounded, SeekDirection::Forward)
            .next();
        let Some((key, _)) = first else {
            break;
        };
        tokens.push(key.token_id);
        match key.token_id.checked_add(1) {
            Some(next) => lower = TokenScanKey::lowest_of(next),
            None => break,
        }
    }
    tokens
}
