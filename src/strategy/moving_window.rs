//! Moving window strategy (§4.H).
//!
//! The only strategy that honors a true sliding interval: no more than
//! `limit.amount` hits are ever admitted within any `limit.window_seconds`
//! span, at the cost of the backend storing one entry per outstanding hit.

use crate::decision::WindowStats;
use crate::error::Result;
use crate::identity::Identity;
use crate::limit::Limit;
use crate::storage::{build_key, MovingWindowStorage, StrategyTag};

/// Moving window (sliding log) rate limiting strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct MovingWindow;

impl MovingWindow {
    pub fn new() -> Self {
        Self
    }

    pub async fn hit<S: MovingWindowStorage>(&self, storage: &S, limit: &Limit, identity: &Identity) -> Result<bool> {
        let key = build_key(StrategyTag::MovingWindow, limit, identity);
        storage
            .acquire_entry(&key, limit.amount(), limit.window_seconds())
            .await
    }

    pub async fn test<S: MovingWindowStorage>(&self, storage: &S, limit: &Limit, identity: &Identity) -> Result<bool> {
        let key = build_key(StrategyTag::MovingWindow, limit, identity);
        let occupancy = storage
            .get_moving_window(&key, limit.amount(), limit.window_seconds())
            .await?;
        let count = occupancy.map(|(_, count)| count).unwrap_or(0);
        Ok(count < limit.amount())
    }

    pub async fn get_window_stats<S: MovingWindowStorage>(
        &self,
        storage: &S,
        limit: &Limit,
        identity: &Identity,
    ) -> Result<WindowStats> {
        let key = build_key(StrategyTag::MovingWindow, limit, identity);
        let occupancy = storage
            .get_moving_window(&key, limit.amount(), limit.window_seconds())
            .await?;
        Ok(match occupancy {
            Some((oldest, count)) => WindowStats::new(
                oldest + limit.window_seconds() as f64,
                limit.amount().saturating_sub(count),
            ),
            None => WindowStats::new(storage.get_expiry(&key).await.unwrap_or(0.0), limit.amount()),
        })
    }
}

impl<S: MovingWindowStorage> super::Strategy<S> for MovingWindow {
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::MockClock;
    use crate::storage::memory::MemoryStorage;

    fn storage_at(now: f64) -> (Arc<MockClock>, MemoryStorage) {
        let clock = Arc::new(MockClock::new(now));
        let storage = MemoryStorage::new().with_clock(clock.clone());
        (clock, storage)
    }

    /// §8 S2: amount=3, window_seconds=10. Hits at t=0,2,4 admitted; hit at
    /// t=5 denied (3 entries still in window); hit at t=10.001 admitted
    /// (t=0 entry now outside the window).
    #[tokio::test]
    async fn s2_moving_window_scenario() {
        let (clock, storage) = storage_at(0.0);
        let strategy = MovingWindow::new();
        let limit = Limit::new(3, 10, "ten_seconds");
        let identity = Identity::new("s2");

        for t in [0.0, 2.0, 4.0] {
            clock.set(t);
            assert!(strategy.hit(&storage, &limit, &identity).await.unwrap(), "t={t} should admit");
        }

        clock.set(5.0);
        assert!(!strategy.hit(&storage, &limit, &identity).await.unwrap());

        clock.set(10.001);
        assert!(strategy.hit(&storage, &limit, &identity).await.unwrap());
    }

    #[tokio::test]
    async fn test_never_mutates_state() {
        let (_clock, storage) = storage_at(0.0);
        let strategy = MovingWindow::new();
        let limit = Limit::new(2, 10, "ten_seconds");
        let identity = Identity::new("s1");

        for _ in 0..5 {
            let _ = strategy.test(&storage, &limit, &identity).await;
        }
        assert!(strategy.hit(&storage, &limit, &identity).await.unwrap());
        assert!(strategy.hit(&storage, &limit, &identity).await.unwrap());
        assert!(!strategy.hit(&storage, &limit, &identity).await.unwrap());
    }
}
