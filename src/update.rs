//! Entity token updates
//!
//! Input to the writers: for one entity, the token ids it carried before a
//! change and the ones it carries after. Also the replay source used to
//! rebuild the whole index.

use std::fmt;

use crate::error::Result;
use crate::writer::TokenScanWriter;

/// Token change of a single entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTokenUpdate {
    entity_id: u64,
    /// Sorted ascending
    tokens_before: Vec<u32>,
    /// Sorted ascending
    tokens_after: Vec<u32>,
    /// Transaction that made the change, 0 when unknown
    tx_id: u64,
}

impl EntityTokenUpdate {
    /// Change of `entity_id` from `before` to `after` tokens
    pub fn token_changes(entity_id: u64, before: &[u32], after: &[u32]) -> Self {
        Self {
            entity_id,
            tokens_before: before.to_vec(),
            tokens_after: after.to_vec(),
            tx_id: 0,
        }
    }

    /// Tag the update with the transaction that produced it
    pub fn with_tx_id(mut self, tx_id: u64) -> Self {
        self.tx_id = tx_id;
        self
    }

    pub fn entity_id(&self) -> u64 {
        self.entity_id
    }

    pub fn tokens_before(&self) -> &[u32] {
        &self.tokens_before
    }

    pub fn tokens_after(&self) -> &[u32] {
        &self.tokens_after
    }

    pub fn tx_id(&self) -> u64 {
        self.tx_id
    }

    /// Tokens present after but not before
    pub fn added(&self) -> impl Iterator<Item = u32> + '_ {
        self.tokens_after
            .iter()
            .copied()
            .filter(move |t| !self.tokens_before.contains(t))
    }

    /// Tokens present before but not after
    pub fn removed(&self) -> impl Iterator<Item = u32> + '_ {
        self.tokens_before
            .iter()
            .copied()
            .filter(move |t| !self.tokens_after.contains(t))
    }
}

impl fmt::Display for EntityTokenUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EntityTokenUpdate[entity:{}, before:{:?}, after:{:?}, tx:{}]",
            self.entity_id, self.tokens_before, self.tokens_after, self.tx_id
        )
    }
}

// =============================================================================
// Full Store Change Stream
// =============================================================================

/// Replays the token assignments of every entity in the owning store.
///
/// Used to rebuild the index from scratch. Updates must be handed to the
/// writer in ascending entity id order with empty `tokens_before`.
pub trait FullStoreChangeStream: Send + Sync {
    /// Write every update into `writer`; returns the number applied
    fn apply_to(&self, writer: &mut dyn TokenScanWriter) -> Result<u64>;
}

/// Stream of a store with no entities
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyStream;

impl FullStoreChangeStream for EmptyStream {
    fn apply_to(&self, _writer: &mut dyn TokenScanWriter) -> Result<u64> {
        Ok(0)
    }
}

impl FullStoreChangeStream for Vec<EntityTokenUpdate> {
    fn apply_to(&self, writer: &mut dyn TokenScanWriter) -> Result<u64> {
        for update in self {
            writer.write(update)?;
        }
        Ok(self.len() as u64)
    }
}
