//! Layout Module
//!
//! On-disk shape of the index entries.
//!
//! ## Record Format
//! ```text
//! ┌──────────────────────────────┬──────────────────────┐
//! │ Key (10 bytes)               │ Value (8 bytes)      │
//! │ ┌───────────┬──────────────┐ │ ┌──────────────────┐ │
//! │ │ Token (4) │ IdRange (6)  │ │ │ Bitmap u64 (8)   │ │
//! │ └───────────┴──────────────┘ │ └──────────────────┘ │
//! └──────────────────────────────┴──────────────────────┘
//! ```
//!
//! Every record is the same size. The id range is stored in 48 bits, so with
//! 64 entities per range the largest representable entity id is `2^54 - 1`.

mod key;
mod range;
mod value;

pub use key::{TokenScanKey, KEY_SIZE, MAX_ID_RANGE};
pub use range::{first_entity_of, offset_of, range_of, MAX_ENTITY_ID, RANGE_SIZE};
pub use value::{TokenScanValue, VALUE_SIZE};

/// Size of one key/value record
pub const RECORD_SIZE: usize = KEY_SIZE + VALUE_SIZE;
