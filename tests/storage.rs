//! Storage-contract invariants (spec §8), exercised against the in-memory
//! backend with a mock clock.

use std::sync::Arc;

use skp_ratelimit::{MemoryStorage, MockClock, MovingWindowStorage, SlidingWindowCounterStorage, Storage};

fn storage_at(now: f64) -> (Arc<MockClock>, MemoryStorage) {
    let clock = Arc::new(MockClock::new(now));
    let storage = MemoryStorage::new().with_clock(clock.clone());
    (clock, storage)
}

/// Invariant 1: within one window, successive `incr` calls return strictly
/// increasing values.
#[tokio::test]
async fn counter_monotonicity_within_window() {
    let (_clock, storage) = storage_at(0.0);
    let mut last = 0;
    for _ in 0..20 {
        let value = storage.incr("mono", 60, false, 1).await.unwrap();
        assert!(value > last);
        last = value;
    }
}

/// Invariant 5: after `get_expiry(K)`, `get(K)` returns 0 (once the window
/// has actually elapsed).
#[tokio::test]
async fn expiry_resets_counter_to_zero() {
    let (clock, storage) = storage_at(0.0);
    storage.incr("k", 10, false, 3).await.unwrap();
    let expiry = storage.get_expiry("k").await.unwrap();
    clock.set(expiry + 0.001);
    assert_eq!(storage.get("k").await.unwrap(), 0);
}

/// Invariant 6: `clear` is idempotent.
#[tokio::test]
async fn clear_is_idempotent() {
    let (_clock, storage) = storage_at(0.0);
    storage.incr("k", 60, false, 1).await.unwrap();
    storage.clear("k").await.unwrap();
    assert_eq!(storage.get("k").await.unwrap(), 0);
    storage.clear("k").await.unwrap();
    assert_eq!(storage.get("k").await.unwrap(), 0);
}

/// Invariant 7: round-trip moving window — after n <= limit admits at
/// times t1..tn, get_moving_window returns (min(ti), n).
#[tokio::test]
async fn moving_window_round_trip() {
    let (clock, storage) = storage_at(0.0);
    for t in [0.0, 1.5, 3.0] {
        clock.set(t);
        assert!(storage.acquire_entry("k", 5, 60).await.unwrap());
    }
    clock.set(3.0);
    let (oldest, count) = storage.get_moving_window("k", 5, 60).await.unwrap().unwrap();
    assert_eq!(count, 3);
    assert_eq!(oldest, 0.0);
}

/// `decr` never creates a key and floors at zero.
#[tokio::test]
async fn decr_never_creates_and_floors_at_zero() {
    let (_clock, storage) = storage_at(0.0);
    assert_eq!(storage.decr("absent", 5).await.unwrap(), 0);
    assert_eq!(storage.get("absent").await.unwrap(), 0);

    storage.incr("present", 60, false, 3).await.unwrap();
    assert_eq!(storage.decr("present", 10).await.unwrap(), 0);
}

/// `elastic_expiry` refreshes the TTL on every call, not only on creation.
#[tokio::test]
async fn elastic_expiry_extends_ttl_each_call() {
    let (clock, storage) = storage_at(0.0);
    storage.incr("k", 10, true, 1).await.unwrap();
    clock.set(9.0);
    storage.incr("k", 10, true, 1).await.unwrap();
    clock.set(15.0);
    assert_eq!(storage.get("k").await.unwrap(), 2);
    clock.set(20.0);
    assert_eq!(storage.get("k").await.unwrap(), 0);
}

/// Sliding-window-counter dual-bucket carryover: after rolling into a new
/// bucket, `previous` reflects the prior bucket's final count.
#[tokio::test]
async fn sliding_window_rolls_current_into_previous() {
    let (clock, storage) = storage_at(0.0);
    for _ in 0..4 {
        assert!(storage.acquire_sliding_window_entry("k", 10, 60, 1).await.unwrap());
    }
    clock.set(61.0);
    let (current, previous, _elapsed, _reset) = storage.get_sliding_window("k", 60).await.unwrap();
    assert_eq!(previous, 4);
    assert_eq!(current, 0);
}

/// Invariant 4: a denied `acquire_sliding_window_entry` call must not
/// mutate the counter — admission and write are one atomic step, not a
/// write followed by an after-the-fact check.
#[tokio::test]
async fn sliding_window_denial_does_not_inflate_counter() {
    let (_clock, storage) = storage_at(0.0);
    for _ in 0..5 {
        assert!(storage.acquire_sliding_window_entry("k", 5, 60, 1).await.unwrap());
    }
    for _ in 0..10 {
        assert!(!storage.acquire_sliding_window_entry("k", 5, 60, 1).await.unwrap());
    }
    let (current, _previous, _elapsed, _reset) = storage.get_sliding_window("k", 60).await.unwrap();
    assert_eq!(current, 5, "repeated denials must not keep incrementing the bucket");
}

/// `check()` is a cheap liveness probe that never mutates rate-limit state.
#[tokio::test]
async fn check_never_mutates_state() {
    let (_clock, storage) = storage_at(0.0);
    for _ in 0..5 {
        assert!(storage.check().await.unwrap());
    }
    assert_eq!(storage.get("anything").await.unwrap(), 0);
}

/// `reset()` clears every key this storage instance owns.
#[tokio::test]
async fn reset_clears_all_keys() {
    let (_clock, storage) = storage_at(0.0);
    storage.incr("a", 60, false, 1).await.unwrap();
    storage.incr("b", 60, false, 1).await.unwrap();
    storage.acquire_entry("c", 5, 60).await.unwrap();

    storage.reset().await.unwrap();

    assert_eq!(storage.get("a").await.unwrap(), 0);
    assert_eq!(storage.get("b").await.unwrap(), 0);
    assert_eq!(storage.get_moving_window("c", 5, 60).await.unwrap(), None);
}
