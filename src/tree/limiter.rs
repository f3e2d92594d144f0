//! Checkpoint I/O limiter
//!
//! Caps the write rate of a checkpoint so it does not starve foreground I/O.

use std::thread;
use std::time::{Duration, Instant};

/// Write-rate cap for checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoLimiter {
    /// None means no limit
    bytes_per_second: Option<u64>,
}

impl IoLimiter {
    /// Write as fast as possible
    pub const UNLIMITED: IoLimiter = IoLimiter { bytes_per_second: None };

    /// Cap writes at `bytes` per second
    pub fn bytes_per_second(bytes: u64) -> Self {
        Self {
            bytes_per_second: Some(bytes.max(1)),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.bytes_per_second.is_none()
    }

    /// Sleep until `written` bytes since `started` are within budget
    pub(crate) fn maybe_limit(&self, started: Instant, written: u64) {
        let Some(rate) = self.bytes_per_second else {
            return;
        };

        let allowed = Duration::from_secs_f64(written as f64 / rate as f64);
        let elapsed = started.elapsed();
        if allowed > elapsed {
            thread::sleep(allowed - elapsed);
        }
    }
}

impl Default for IoLimiter {
    fn default() -> Self {
        Self::UNLIMITED
    }
}
