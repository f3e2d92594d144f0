//! # Token Scan Store
//!
//! A persistent index answering "which entities carry token T?" with:
//! - Fixed-size bitmap ranges: one key per (token, 64-entity range)
//! - Commutative add/remove merging of bitmap deltas
//! - Single-writer/multi-reader access with lazy, ordered scans
//! - Automatic rebuild from a full store change stream on missing or corrupt files
//! - An optional diagnostic write log with rotation, pruning and a dumper
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TokenScanStore                          │
//! │        (lifecycle, rebuild detection, checkpoints)          │
//! └───────────┬─────────────────────────────────┬───────────────┘
//!             │                                 │
//!             ▼                                 ▼
//!   ┌───────────────────┐             ┌───────────────────┐
//!   │      Writers      │             │      Readers      │
//!   │ transactional /   │             │ token, union,     │
//!   │ bulk append       │             │ batched, all      │
//!   └─────────┬─────────┘             └─────────┬─────────┘
//!             │ merge policy                    │ seek cursors
//!             ▼                                 ▼
//!   ┌─────────────────────────────────────────────────────┐
//!   │                        Tree                         │
//!   │     [token:u32 | range:u48] -> [bits:u64]           │
//!   └─────────────────────────────────────────────────────┘
//!             │
//!             ▼ (observed by)
//!   ┌───────────────────┐
//!   │     Write Log     │
//!   └───────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod layout;
pub mod merge;
pub mod tree;
pub mod writelog;
pub mod update;
pub mod writer;
pub mod reader;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, ScanStoreError};
pub use config::{Config, EntityType, WriteLogConfig};
pub use layout::{TokenScanKey, TokenScanValue, RANGE_SIZE};
pub use reader::{IndexOrder, TokenScanReader};
pub use store::{ScanStoreMonitor, StoreState, TokenScanStore};
pub use tree::IoLimiter;
pub use update::{EmptyStream, EntityTokenUpdate, FullStoreChangeStream};
pub use writer::TokenScanWriter;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
