//! Union of several per-token iterators.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::EntityIdIterator;

/// K-way merge of ascending entity iterators, dropping duplicates
pub struct UnionIterator<'a> {
    iterators: Vec<EntityIdIterator<'a>>,
    /// Smallest pending id of each iterator, with the iterator index
    heads: BinaryHeap<Reverse<(u64, usize)>>,
    last: Option<u64>,
}

impl<'a> UnionIterator<'a> {
    pub(crate) fn new(mut iterators: Vec<EntityIdIterator<'a>>) -> Self {
        let mut heads = BinaryHeap::with_capacity(iterators.len());
        for (index, iterator) in iterators.iter_mut().enumerate() {
            if let Some(id) = iterator.next() {
                heads.push(Reverse((id, index)));
            }
        }

        Self {
            iterators,
            heads,
            last: None,
        }
    }
}

impl Iterator for UnionIterator<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        while let Some(Reverse((id, index))) = self.heads.pop() {
            if let Some(next) = self.iterators[index].next() {
                self.heads.push(Reverse((next, index)));
            }
            if self.last != Some(id) {
                self.last = Some(id);
                return Some(id);
            }
        }
        None
    }
}
