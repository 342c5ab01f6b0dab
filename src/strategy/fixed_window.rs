//! Fixed window strategy (§4.G).
//!
//! Simplest and cheapest strategy: one counter per `(limit, identity)`,
//! reset whenever the backend's TTL lapses. Admits bursts at window
//! boundaries (up to `2 * amount` hits across a boundary), unlike the
//! moving window.

use crate::decision::WindowStats;
use crate::error::Result;
use crate::identity::Identity;
use crate::limit::Limit;
use crate::storage::{build_key, Storage, StrategyTag};

/// Fixed window rate limiting strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedWindow;

impl FixedWindow {
    pub fn new() -> Self {
        Self
    }

    /// Check whether a request is allowed and record it, atomically.
    pub async fn hit<S: Storage>(&self, storage: &S, limit: &Limit, identity: &Identity) -> Result<bool> {
        let key = build_key(StrategyTag::Fixed, limit, identity);
        let value = storage.incr(&key, limit.window_seconds(), false, 1).await?;
        Ok(value <= limit.amount())
    }

    /// Peek at whether a request would be allowed, without recording it.
    pub async fn test<S: Storage>(&self, storage: &S, limit: &Limit, identity: &Identity) -> Result<bool> {
        let key = build_key(StrategyTag::Fixed, limit, identity);
        let current = storage.get(&key).await?;
        Ok(current < limit.amount())
    }

    /// Current occupancy for this `(limit, identity)` without mutating.
    pub async fn get_window_stats<S: Storage>(
        &self,
        storage: &S,
        limit: &Limit,
        identity: &Identity,
    ) -> Result<WindowStats> {
        let key = build_key(StrategyTag::Fixed, limit, identity);
        let count = storage.get(&key).await?;
        let reset_epoch = storage.get_expiry(&key).await?;
        Ok(WindowStats::new(reset_epoch, limit.amount().saturating_sub(count)))
    }
}

impl<S: Storage> super::Strategy<S> for FixedWindow {
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

    #[tokio::test]
    async fn admits_up_to_limit_then_denies() {
        let (_clock, storage) = storage_at(0.0);
        let strategy = FixedWindow::new();
        let limit = Limit::new(3, 60, "minute");
        let identity = Identity::new("s1");

        for i in 0..3 {
            assert!(strategy.hit(&storage, &limit, &identity).await.unwrap(), "hit {i} should admit");
        }
        assert!(!strategy.hit(&storage, &limit, &identity).await.unwrap());
    }

    #[tokio::test]
    async fn fresh_window_after_boundary_admits_again() {
        let (clock, storage) = storage_at(0.0);
        let strategy = FixedWindow::new();
        let limit = Limit::new(3, 60, "minute");
        let identity = Identity::new("s1");

        for _ in 0..3 {
            strategy.hit(&storage, &limit, &identity).await.unwrap();
        }
        assert!(!strategy.hit(&storage, &limit, &identity).await.unwrap());

        clock.advance(60.0);
        assert!(strategy.hit(&storage, &limit, &identity).await.unwrap());
    }

    #[tokio::test]
    async fn test_never_mutates() {
        let (_clock, storage) = storage_at(0.0);
        let strategy = FixedWindow::new();
        let limit = Limit::new(2, 60, "minute");
        let identity = Identity::new("s1");

        assert!(strategy.test(&storage, &limit, &identity).await.unwrap());
        assert!(strategy.test(&storage, &limit, &identity).await.unwrap());
        // still fresh: both hits should be admitted after repeated peeks
        assert!(strategy.hit(&storage, &limit, &identity).await.unwrap());
        assert!(strategy.hit(&storage, &limit, &identity).await.unwrap());
        assert!(!strategy.hit(&storage, &limit, &identity).await.unwrap());
    }

    #[tokio::test]
    async fn window_stats_never_exceed_limit() {
        let (_clock, storage) = storage_at(0.0);
        let strategy = FixedWindow::new();
        let limit = Limit::new(5, 60, "minute");
        let identity = Identity::new("s1");

        for _ in 0..7 {
            let _ = strategy.hit(&storage, &limit, &identity).await;
        }
        let stats = strategy.get_window_stats(&storage, &limit, &identity).await.unwrap();
        assert!(stats.remaining <= limit.amount());
        assert_eq!(stats.remaining, 0);
    }
}
