//! Result types for rate limit checks.

use serde::{Deserialize, Serialize};

/// A snapshot of a limit's current occupancy, independent of any single
/// hit/test call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    /// Wall-clock second at which capacity frees up (strategy-specific
    /// meaning: the fixed window's boundary, the moving window's oldest
    /// entry expiring, or the sliding-window-counter's next bucket edge).
    pub reset_epoch: f64,
    /// Hits still available before the next call would be denied.
    pub remaining: u64,
}

impl WindowStats {
    pub fn new(reset_epoch: f64, remaining: u64) -> Self {
        Self {
            reset_epoch,
            remaining,
        }
    }
}
