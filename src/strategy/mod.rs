//! Rate limiting strategies.
//!
//! Each strategy is generic over the storage capability it needs (§9:
//! dispatch through the trait bound, not a registry), and exposes the same
//! three operations: `hit` (check-and-record), `test` (peek, never
//! mutates), and `get_window_stats` (current occupancy snapshot).

mod fixed_window;
mod moving_window;
mod sliding_window_counter;

pub use fixed_window::FixedWindow;
pub use moving_window::MovingWindow;
pub use sliding_window_counter::SlidingWindowCounter;

use crate::decision::WindowStats;
use crate::error::Result;
use crate::identity::Identity;
use crate::limit::Limit;

/// Shared shape of the three strategies, for callers that want to hold
/// one behind a `Box<dyn Strategy<S>>`-style abstraction.
pub trait Strategy<S>: Send + Sync + 'static {
    fn hit(
        &self,
        storage: &S,
        limit: &Limit,
        identity: &Identity,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    fn test(
        &self,
        storage: &S,
        limit: &Limit,
        identity: &Identity,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    fn get_window_stats(
        &self,
        storage: &S,
        limit: &Limit,
        identity: &Identity,
    ) -> impl std::future::Future<Output = Result<WindowStats>> + Send;
}
