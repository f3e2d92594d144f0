//! Range addressing
//!
//! Maps an entity id to the range holding it and its bit inside that range.

use super::key::MAX_ID_RANGE;

/// Number of consecutive entity ids covered by one bitmap value
pub const RANGE_SIZE: u64 = 64;

/// Largest entity id whose range still fits the 48-bit key field
pub const MAX_ENTITY_ID: u64 = (MAX_ID_RANGE + 1) * RANGE_SIZE - 1;

/// Range containing `entity_id`
#[inline]
pub fn range_of(entity_id: u64) -> u64 {
    entity_id / RANGE_SIZE
}

/// Bit position of `entity_id` within its range
#[inline]
pub fn offset_of(entity_id: u64) -> u32 {
    (entity_id % RANGE_SIZE) as u32
}

/// First entity id covered by `id_range`
#[inline]
pub fn first_entity_of(id_range: u64) -> u64 {
    id_range * RANGE_SIZE
}
