//! Store header
//!
//! Small bincode payload carried in the tree file header. It records whether
//! the last rebuild completed, so a crash mid-rebuild is detected on the
//! next start.

use serde::{Deserialize, Serialize};

use crate::config::EntityType;
use crate::error::{Result, ScanStoreError};

/// Whether the tree content can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebuildState {
    Clean,
    NeedsRebuilding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHeader {
    pub state: RebuildState,
    pub entity_type: EntityType,
}

impl StoreHeader {
    pub fn new(state: RebuildState, entity_type: EntityType) -> Self {
        Self { state, entity_type }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a header payload; anything unreadable is a metadata mismatch
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| ScanStoreError::MetadataMismatch(format!("unreadable store header: {}", e)))
    }
}
