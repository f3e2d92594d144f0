//! Index key: which token, which block of entity ids.

use std::fmt;

use crate::error::{Result, ScanStoreError};

/// Encoded key size: token id (4) + id range (6)
pub const KEY_SIZE: usize = 10;

/// Largest id range representable in the 6-byte key field
pub const MAX_ID_RANGE: u64 = (1 << 48) - 1;

/// Key of one bitmap entry.
///
/// Ordered by token id first, then by id range, which is the order the
/// tree stores entries in. Field order matters for the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenScanKey {
    pub token_id: u32,
    pub id_range: u64,
}

impl TokenScanKey {
    pub fn new(token_id: u32, id_range: u64) -> Self {
        Self { token_id, id_range }
    }

    /// Smallest possible key, for unbounded seeks
    pub fn lowest() -> Self {
        Self::new(0, 0)
    }

    /// Largest possible key, for unbounded seeks
    pub fn highest() -> Self {
        Self::new(u32::MAX, MAX_ID_RANGE)
    }

    /// Lowest key of a single token
    pub fn lowest_of(token_id: u32) -> Self {
        Self::new(token_id, 0)
    }

    /// Highest key of a single token
    pub fn highest_of(token_id: u32) -> Self {
        Self::new(token_id, MAX_ID_RANGE)
    }

    /// Write the key into `buf` (big-endian, `KEY_SIZE` bytes)
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.token_id.to_be_bytes());
        buf[4..10].copy_from_slice(&self.id_range.to_be_bytes()[2..8]);
    }

    /// Read a key previously written with `write_to`
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < KEY_SIZE {
            return Err(ScanStoreError::Corrupted(format!(
                "Key record too short: expected {} bytes, got {}",
                KEY_SIZE,
                buf.len()
            )));
        }

        let mut token = [0u8; 4];
        token.copy_from_slice(&buf[0..4]);

        let mut range = [0u8; 8];
        range[2..8].copy_from_slice(&buf[4..10]);

        Ok(Self {
            token_id: u32::from_be_bytes(token),
            id_range: u64::from_be_bytes(range),
        })
    }
}

impl fmt::Display for TokenScanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[token:{},range:{}]", self.token_id, self.id_range)
    }
}
