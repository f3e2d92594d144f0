//! Writer Module
//!
//! Two ways of getting entity token updates into the tree:
//!
//! - [`TransactionalWriter`]: arbitrary adds and removes, buffered for one
//!   session and merged into the tree on close
//! - [`BulkAppendWriter`]: ascending, add-only streams for initial
//!   population, merged range by range as the stream moves on
//!
//! Both hold the tree's single writer slot for their whole session.

mod bulk;
mod transactional;

use crate::error::Result;
use crate::update::EntityTokenUpdate;

pub use bulk::BulkAppendWriter;
pub use transactional::TransactionalWriter;

/// Sink for entity token updates
pub trait TokenScanWriter {
    /// Accept one update
    fn write(&mut self, update: &EntityTokenUpdate) -> Result<()>;

    /// Merge everything pending and release the tree writer.
    ///
    /// Calling close again is a no-op.
    fn close(&mut self) -> Result<()>;
}
