//! Index value: one bit per entity in a range.

use std::fmt;

use crate::error::{Result, ScanStoreError};

use super::range::{offset_of, RANGE_SIZE};

/// Encoded value size: one u64 bitmap
pub const VALUE_SIZE: usize = 8;

/// Bitmap of the entities in one range carrying one token.
///
/// Bit `i` set means entity `id_range * 64 + i` has the token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TokenScanValue {
    pub bits: u64,
}

impl TokenScanValue {
    pub fn new(bits: u64) -> Self {
        Self { bits }
    }

    /// Value with only the bit of `entity_id` set
    pub fn of_entity(entity_id: u64) -> Self {
        let mut value = Self::default();
        value.set(entity_id);
        value
    }

    /// Set the bit for `entity_id` (only its offset within the range is used)
    pub fn set(&mut self, entity_id: u64) {
        self.bits |= 1u64 << offset_of(entity_id);
    }

    /// Clear the bit for `entity_id`
    pub fn unset(&mut self, entity_id: u64) {
        self.bits &= !(1u64 << offset_of(entity_id));
    }

    pub fn contains(&self, entity_id: u64) -> bool {
        self.bits & (1u64 << offset_of(entity_id)) != 0
    }

    /// OR `other` into this value
    pub fn add(&mut self, other: &TokenScanValue) {
        self.bits |= other.bits;
    }

    /// Clear every bit set in `other`
    pub fn remove(&mut self, other: &TokenScanValue) {
        self.bits &= !other.bits;
    }

    pub fn clear(&mut self) {
        self.bits = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    /// Write the value into `buf` (big-endian, `VALUE_SIZE` bytes)
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..VALUE_SIZE].copy_from_slice(&self.bits.to_be_bytes());
    }

    /// Read a value previously written with `write_to`
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < VALUE_SIZE {
            return Err(ScanStoreError::Corrupted(format!(
                "Value record too short: expected {} bytes, got {}",
                VALUE_SIZE,
                buf.len()
            )));
        }
        let mut bits = [0u8; VALUE_SIZE];
        bits.copy_from_slice(&buf[0..VALUE_SIZE]);
        Ok(Self::new(u64::from_be_bytes(bits)))
    }
}

impl fmt::Display for TokenScanValue {
    /// Renders the bitmap with bit 0 on the right, padded to the range size
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$b}", self.bits, width = RANGE_SIZE as usize)
    }
}
