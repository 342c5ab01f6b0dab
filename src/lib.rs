//! Distributed rate limiting core.
//!
//! `skp_ratelimit` provides three rate-limiting strategies — fixed window,
//! moving window, and sliding-window counter — defined on top of a
//! pluggable storage abstraction. The storage contract is a capability set
//! ([`storage::Storage`], [`storage::MovingWindowStorage`],
//! [`storage::SlidingWindowCounterStorage`]); a strategy's generic bound
//! names exactly the capability it needs, resolved at compile time rather
//! than through a registry.
//!
//! URI parsing, a backend registry, and a rate-limit item DSL
//! (`"10 per minute"`) are explicitly out of scope for this crate: callers
//! construct a [`storage::MemoryStorage`]/[`storage::redis::RedisStorage`]/etc
//! directly from an already-connected client, and a [`limit::Limit`]
//! directly from its `(amount, window_seconds, granularity_name)` fields.
//!
//! # Quick Start
//!
//! ```
//! use skp_ratelimit::{FixedWindow, Identity, Limit, MemoryStorage};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let storage = MemoryStorage::new();
//! let strategy = FixedWindow::new();
//! let limit = Limit::per_minute(100);
//! let identity = Identity::new("api").with("user:42");
//!
//! if strategy.hit(&storage, &limit, &identity).await.unwrap() {
//!     println!("admitted");
//! } else {
//!     println!("denied");
//! }
//! # }
//! ```
//!
//! # Strategies
//!
//! | Strategy | Storage capability | Accuracy | Cost |
//! |----------|---------------------|----------|------|
//! | [`FixedWindow`] | [`storage::Storage`] | approximate (2x edge burst) | one counter per key |
//! | [`MovingWindow`] | [`storage::MovingWindowStorage`] | exact | one entry per outstanding hit |
//! | [`SlidingWindowCounter`] | [`storage::SlidingWindowCounterStorage`] | weighted approximation | two counters per key |
//!
//! # Feature Flags
//!
//! - `memory` (default): in-memory storage with a background reaper.
//! - `redis`: Redis storage backend (counters via `INCRBY`, entries via sorted sets + Lua scripts).
//! - `memcached`: Memcached storage backend (counters via `add`+`incr`, entries via a bounded CAS loop).
//! - `mongodb`: MongoDB storage backend (counters/entries via `findOneAndUpdate` with a TTL index).

pub mod clock;
pub mod decision;
pub mod error;
pub mod identity;
pub mod limit;
pub mod storage;
pub mod strategy;

pub use clock::{Clock, MockClock, SystemClock};
pub use decision::WindowStats;
pub use error::{ConcurrentUpdateError, ConfigurationError, Result, StorageError};
pub use identity::Identity;
pub use limit::Limit;
pub use storage::{MovingWindowStorage, SlidingWindowCounterStorage, Storage};
pub use strategy::{FixedWindow, MovingWindow, SlidingWindowCounter, Strategy};

#[cfg(feature = "memory")]
pub use storage::{GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisStorage};

#[cfg(feature = "memcached")]
pub use storage::{MemcachedConfig, MemcachedStorage};

#[cfg(feature = "mongodb")]
pub use storage::{MongoConfig, MongoStorage};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::clock::{Clock, MockClock, SystemClock};
    pub use crate::decision::WindowStats;
    pub use crate::error::{ConfigurationError, Result, StorageError};
    pub use crate::identity::Identity;
    pub use crate::limit::Limit;
    pub use crate::storage::{MovingWindowStorage, SlidingWindowCounterStorage, Storage};
    pub use crate::strategy::{FixedWindow, MovingWindow, SlidingWindowCounter, Strategy};

    #[cfg(feature = "memory")]
    pub use crate::storage::{GcConfig, GcInterval, MemoryStorage};
}
