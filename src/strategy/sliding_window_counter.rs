//! Sliding window counter strategy (§4.I).
//!
//! Approximates a true sliding window with two fixed counters (current and
//! previous bucket) and a linear decay weight, trading a small amount of
//! accuracy at window edges for O(1) storage instead of the moving
//! window's O(amount).

use crate::decision::WindowStats;
use crate::error::Result;
use crate::identity::Identity;
use crate::limit::Limit;
use crate::storage::{build_key, SlidingWindowCounterStorage, StrategyTag};

/// Sliding window counter rate limiting strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlidingWindowCounter;

/// `floor(previous * (1 - elapsed/window)) + current`, per §4.I.
fn weighted_count(current: u64, previous: u64, elapsed_seconds: f64, window_seconds: u64) -> u64 {
    let weight_prev = 1.0 - elapsed_seconds / window_seconds as f64;
    (previous as f64 * weight_prev).floor() as u64 + current
}

impl SlidingWindowCounter {
    pub fn new() -> Self {
        Self
    }

    pub async fn hit<S: SlidingWindowCounterStorage>(
        &self,
        storage: &S,
        limit: &Limit,
        identity: &Identity,
    ) -> Result<bool> {
        let key = build_key(StrategyTag::SlidingWindowCounter, limit, identity);
        storage
            .acquire_sliding_window_entry(&key, limit.amount(), limit.window_seconds(), 1)
            .await
    }

    pub async fn test<S: SlidingWindowCounterStorage>(
        &self,
        storage: &S,
        limit: &Limit,
        identity: &Identity,
    ) -> Result<bool> {
        let key = build_key(StrategyTag::SlidingWindowCounter, limit, identity);
        let (current, previous, elapsed, _reset_epoch) =
            storage.get_sliding_window(&key, limit.window_seconds()).await?;
        let weighted = weighted_count(current, previous, elapsed, limit.window_seconds());
        Ok(weighted < limit.amount())
    }

    pub async fn get_window_stats<S: SlidingWindowCounterStorage>(
        &self,
        storage: &S,
        limit: &Limit,
        identity: &Identity,
    ) -> Result<WindowStats> {
        let key = build_key(StrategyTag::SlidingWindowCounter, limit, identity);
        let (current, previous, elapsed, reset_epoch) =
            storage.get_sliding_window(&key, limit.window_seconds()).await?;
        let weighted = weighted_count(current, previous, elapsed, limit.window_seconds());
        Ok(WindowStats::new(
            reset_epoch,
            limit.amount().saturating_sub(weighted),
        ))
    }
}

impl<S: SlidingWindowCounterStorage> super::Strategy<S> for SlidingWindowCounter {
    async fn hit(&self, storage: &S, limit: &Limit, identity: &Identity) -> Result<bool> {
        self.hit(storage, limit, identity).await
    }

    async fn test(&self, storage: &S, limit: &Limit, identity: &Identity) -> Result<bool> {
        self.test(storage, limit, identity).await
    }

    async fn get_window_stats(&self, storage: &S, limit: &Limit, identity: &Identity) -> Result<WindowStats> {
        self.get_window_stats(storage, limit, identity).await
    }
}
