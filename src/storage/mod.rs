//! Pluggable storage backends for the rate-limiting strategies.
//!
//! The contract is a capability set (§4.B, §9), not one monolithic trait:
//! [`Storage`] is the base every backend implements; [`MovingWindowStorage`]
//! and [`SlidingWindowCounterStorage`] extend it with the operations only
//! the moving-window and sliding-window-counter strategies need. A
//! strategy's generic bound names exactly the capability it requires,
//! resolved at compile time rather than through a registry.

mod key;
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "memcached")]
pub mod memcached;

#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use key::{build_key, StrategyTag};
pub use memory::{GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisStorage};

#[cfg(feature = "memcached")]
pub use memcached::{MemcachedConfig, MemcachedStorage};

#[cfg(feature = "mongodb")]
pub use mongodb::{MongoConfig, MongoStorage};

use std::future::Future;
use std::sync::Arc;

use crate::error::Result;

/// Counter operations every backend must provide.
pub trait Storage: Send + Sync + 'static {
    /// Atomically add `amount` to the counter at `key`, creating it with
    /// `expiry_seconds` TTL if absent. If `elastic_expiry` is set, the TTL
    /// is reset to `expiry_seconds` on every call, not only on creation.
    /// Returns the post-increment value.
    fn incr(
        &self,
        key: &str,
        expiry_seconds: u64,
        elastic_expiry: bool,
        amount: u64,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Atomically subtract `amount`, floored at zero. Used to roll back an
    /// optimistic increment.
    fn decr(&self, key: &str, amount: u64) -> impl Future<Output = Result<u64>> + Send;

    /// Current counter value, `0` if absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<u64>> + Send;

    /// Wall-clock second at which `key`'s current window ends; `now` if
    /// absent.
    fn get_expiry(&self, key: &str) -> impl Future<Output = Result<f64>> + Send;

    /// Cheap connectivity probe; never touches rate-limit state.
    fn check(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Clear every key this storage instance owns, for test teardown.
    fn reset(&self) -> impl Future<Output = Result<()>> + Send;

    /// Remove one key immediately.
    fn clear(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Entry-list operations backing the moving-window strategy (§4.H).
pub trait MovingWindowStorage: Storage {
    /// Attempt to record one new timestamp under `key`. Returns whether it
    /// was admitted (fewer than `limit_amount` entries remain within
    /// `expiry_seconds` of now, after trimming).
    fn acquire_entry(
        &self,
        key: &str,
        limit_amount: u64,
        expiry_seconds: u64,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Current occupancy (`oldest_seconds`, `count`) without mutating.
    /// `None` if the key has never been written.
    fn get_moving_window(
        &self,
        key: &str,
        limit_amount: u64,
        expiry_seconds: u64,
    ) -> impl Future<Output = Result<Option<(f64, u64)>>> + Send;
}

/// Dual-bucket operations backing the sliding-window-counter strategy (§4.I).
pub trait SlidingWindowCounterStorage: Storage {
    /// Atomically: compute the weighted count across the current and
    /// (decayed) previous bucket, carrying over `previous` if the window
    /// has rolled; if `weighted + amount <= limit_amount`, add `amount` to
    /// the current bucket and return `true`, else leave state untouched
    /// and return `false` (§4.B). Unlike [`Storage::incr`], a denied call
    /// MUST NOT mutate the counter — admission and mutation are one
    /// atomic step, not two.
    fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit_amount: u64,
        expiry_seconds: u64,
        amount: u64,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Read `(current, previous, elapsed_in_current_seconds,
    /// current_bucket_reset_epoch)` without mutating. The caller has no
    /// clock of its own, so the backend (which does) reports the absolute
    /// epoch alongside the relative `elapsed` used by the weighting
    /// formula.
    fn get_sliding_window(
        &self,
        key: &str,
        expiry_seconds: u64,
    ) -> impl Future<Output = Result<(u64, u64, f64, f64)>> + Send;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    async fn incr(&self, key: &str, expiry_seconds: u64, elastic_expiry: bool, amount: u64) -> Result<u64> {
        (**self).incr(key, expiry_seconds, elastic_expiry, amount).await
    }

    async fn decr(&self, key: &str, amount: u64) -> Result<u64> {
        (**self).decr(key, amount).await
    }

    async fn get(&self, key: &str) -> Result<u64> {
        (**self).get(key).await
    }

    async fn get_expiry(&self, key: &str) -> Result<f64> {
        (**self).get_expiry(key).await
    }

    async fn check(&self) -> Result<bool> {
        (**self).check().await
    }

    async fn reset(&self) -> Result<()> {
        (**self).reset().await
    }

    async fn clear(&self, key: &str) -> Result<()> {
        (**self).clear(key).await
    }
}

impl<S: MovingWindowStorage + ?Sized> MovingWindowStorage for Arc<S> {
    async fn acquire_entry(&self, key: &str, limit_amount: u64, expiry_seconds: u64) -> Result<bool> {
        (**self).acquire_entry(key, limit_amount, expiry_seconds).await
    }

    async fn get_moving_window(
        &self,
        key: &str,
        limit_amount: u64,
        expiry_seconds: u64,
    ) -> Result<Option<(f64, u64)>> {
        (**self).get_moving_window(key, limit_amount, expiry_seconds).await
    }
}

impl<S: SlidingWindowCounterStorage + ?Sized> SlidingWindowCounterStorage for Arc<S> {
    async fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit_amount: u64,
        expiry_seconds: u64,
        amount: u64,
    ) -> Result<bool> {
        (**self)
            .acquire_sliding_window_entry(key, limit_amount, expiry_seconds, amount)
            .await
    }

    async fn get_sliding_window(&self, key: &str, expiry_seconds: u64) -> Result<(u64, u64, f64, f64)> {
        (**self).get_sliding_window(key, expiry_seconds).await
    }
}
