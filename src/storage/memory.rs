//! In-process storage backend: counters, entry lists, and dual buckets in a
//! `DashMap`, with a lazy-expiry-on-read policy plus an optional background
//! reaper for keys nobody touches again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::storage::{MovingWindowStorage, SlidingWindowCounterStorage, Storage};

/// When the background reaper sweeps the map.
#[derive(Debug, Clone, Copy)]
pub enum GcInterval {
    /// Run a sweep every N calls into the storage.
    Requests(u64),
    /// Run a sweep on a fixed wall-clock interval.
    Duration(Duration),
    /// Never run automatically; only `run_gc()` triggers a sweep.
    Manual,
}

impl Default for GcInterval {
    fn default() -> Self {
        Self::Requests(10_000)
    }
}

/// Reaper configuration.
#[derive(Debug, Clone)]
pub struct GcConfig {
    interval: GcInterval,
    max_age: Duration,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval: GcInterval::default(),
            max_age: Duration::from_secs(3600),
        }
    }
}

impl GcConfig {
    pub fn on_requests(n: u64) -> Self {
        Self {
            interval: GcInterval::Requests(n),
            ..Default::default()
        }
    }

    pub fn on_duration(d: Duration) -> Self {
        Self {
            interval: GcInterval::Duration(d),
            ..Default::default()
        }
    }

    pub fn manual() -> Self {
        Self {
            interval: GcInterval::Manual,
            ..Default::default()
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

enum SlotKind {
    Counter {
        value: u64,
    },
    Entries {
        // newest-first (§4.C Open Question 1): front = most recent acquisition.
        timestamps: VecDeque<f64>,
    },
    Dual {
        bucket_index: i64,
        current: u64,
        previous: u64,
        window_seconds: u64,
    },
}

struct Stored {
    kind: SlotKind,
    /// Wall-clock second at which this entry's current window/TTL ends.
    expires_at: f64,
    /// Last time any operation touched this key; the reaper keeps an entry
    /// alive past `expires_at` if it was touched recently, mirroring the
    /// dual "ttl OR recent activity" retention criterion.
    last_touch: f64,
}

type Entry = Mutex<Stored>;

/// In-process storage. Implements all three capability traits.
pub struct MemoryStorage {
    data: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    gc_config: GcConfig,
    request_count: AtomicU64,
    last_gc: AtomicU64,
    gc_lock: Mutex<()>,
    shutdown: Arc<Notify>,
    gc_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_clock_and_gc(Arc::new(SystemClock), GcConfig::default())
    }

    pub fn with_gc(gc_config: GcConfig) -> Self {
        Self::with_clock_and_gc(Arc::new(SystemClock), gc_config)
    }

    /// Swap in a different clock, e.g. a [`crate::clock::MockClock`] for
    /// deterministic tests. Builder-style to match the other backends.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_clock_and_gc(clock: Arc<dyn Clock>, gc_config: GcConfig) -> Self {
        Self {
            data: DashMap::new(),
            clock,
            gc_config,
            request_count: AtomicU64::new(0),
            last_gc: AtomicU64::new(0),
            gc_lock: Mutex::new(()),
            shutdown: Arc::new(Notify::new()),
            gc_handle: Mutex::new(None),
        }
    }

    /// Spawn the background sweeper task, if the reaper is interval-based.
    /// No-op for `GcInterval::Requests`/`Manual`.
    pub fn start_gc_task(self: &Arc<Self>) {
        let GcInterval::Duration(interval) = self.gc_config.interval else {
            return;
        };
        let this = Arc::clone(self);
        let shutdown = Arc::clone(&this.shutdown);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        this.run_gc();
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });
        *self.gc_handle.lock() = Some(handle);
    }

    /// Manually trigger a sweep now.
    pub fn run_gc(&self) {
        let Some(_guard) = self.gc_lock.try_lock() else {
            return;
        };
        let now = self.clock.now();
        let cutoff = now - self.gc_config.max_age.as_secs_f64();
        self.data
            .retain(|_, entry| entry.lock().is_alive(now, cutoff));
    }

    fn maybe_run_gc(&self) {
        match self.gc_config.interval {
            GcInterval::Requests(n) => {
                let count = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count % n.max(1) == 0 {
                    self.run_gc();
                }
            }
            GcInterval::Duration(_) | GcInterval::Manual => {}
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn now(&self) -> f64 {
        self.clock.now()
    }
}

impl Stored {
    fn is_alive(&self, now: f64, cutoff: f64) -> bool {
        self.expires_at > now || self.last_touch > cutoff
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
        if let Some(handle) = self.gc_handle.lock().take() {
            handle.abort();
        }
    }
}

impl Storage for MemoryStorage {
    async fn incr(&self, key: &str, expiry_seconds: u64, elastic_expiry: bool, amount: u64) -> Result<u64> {
        self.maybe_run_gc();
        let now = self.now();
        let entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| {
                Mutex::new(Stored {
                    kind: SlotKind::Counter { value: 0 },
                    expires_at: now + expiry_seconds as f64,
                    last_touch: now,
                })
            });
        let mut stored = entry.lock();
        if !matches!(stored.kind, SlotKind::Counter { .. }) {
            stored.kind = SlotKind::Counter { value: 0 };
        }
        if now >= stored.expires_at {
            stored.kind = SlotKind::Counter { value: 0 };
            stored.expires_at = now + expiry_seconds as f64;
        } else if elastic_expiry {
            stored.expires_at = now + expiry_seconds as f64;
        }
        stored.last_touch = now;
        let SlotKind::Counter { value } = &mut stored.kind else {
            unreachable!()
        };
        *value += amount;
        Ok(*value)
    }

    async fn decr(&self, key: &str, amount: u64) -> Result<u64> {
        let Some(entry) = self.data.get(key) else {
            return Ok(0);
        };
        let mut stored = entry.lock();
        let SlotKind::Counter { value } = &mut stored.kind else {
            return Ok(0);
        };
        *value = value.saturating_sub(amount);
        Ok(*value)
    }

    async fn get(&self, key: &str) -> Result<u64> {
        let now = self.now();
        let Some(entry) = self.data.get(key) else {
            return Ok(0);
        };
        let stored = entry.lock();
        match &stored.kind {
            SlotKind::Counter { value } if now < stored.expires_at => Ok(*value),
            _ => Ok(0),
        }
    }

    async fn get_expiry(&self, key: &str) -> Result<f64> {
        let now = self.now();
        match self.data.get(key) {
            Some(entry) => {
                let stored = entry.lock();
                Ok(if now < stored.expires_at { stored.expires_at } else { now })
            }
            None => Ok(now),
        }
    }

    async fn check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn reset(&self) -> Result<()> {
        self.data.clear();
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }
}

impl MovingWindowStorage for MemoryStorage {
    async fn acquire_entry(&self, key: &str, limit_amount: u64, expiry_seconds: u64) -> Result<bool> {
        self.maybe_run_gc();
        let now = self.now();
        let cutoff = now - expiry_seconds as f64;
        let entry = self.data.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(Stored {
                kind: SlotKind::Entries {
                    timestamps: VecDeque::new(),
                },
                expires_at: now + expiry_seconds as f64,
                last_touch: now,
            })
        });
        let mut stored = entry.lock();
        if !matches!(stored.kind, SlotKind::Entries { .. }) {
            stored.kind = SlotKind::Entries {
                timestamps: VecDeque::new(),
            };
        }
        stored.last_touch = now;
        stored.expires_at = now + expiry_seconds as f64;
        let SlotKind::Entries { timestamps } = &mut stored.kind else {
            unreachable!()
        };
        while matches!(timestamps.back(), Some(&t) if t <= cutoff) {
            timestamps.pop_back();
        }
        if (timestamps.len() as u64) < limit_amount {
            timestamps.push_front(now);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get_moving_window(
        &self,
        key: &str,
        _limit_amount: u64,
        expiry_seconds: u64,
    ) -> Result<Option<(f64, u64)>> {
        let now = self.now();
        let cutoff = now - expiry_seconds as f64;
        let Some(entry) = self.data.get(key) else {
            return Ok(None);
        };
        let stored = entry.lock();
        let SlotKind::Entries { timestamps } = &stored.kind else {
            return Ok(None);
        };
        let mut count = 0u64;
        let mut oldest = None;
        for &t in timestamps.iter() {
            if t > cutoff {
                count += 1;
                oldest = Some(t);
            }
        }
        Ok(oldest.map(|o| (o, count)))
    }
}

impl SlidingWindowCounterStorage for MemoryStorage {
    async fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit_amount: u64,
        expiry_seconds: u64,
        amount: u64,
    ) -> Result<bool> {
        self.maybe_run_gc();
        let now = self.now();
        let window = expiry_seconds.max(1);
        let idx = (now / window as f64).floor() as i64;
        let entry = self.data.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(Stored {
                kind: SlotKind::Dual {
                    bucket_index: idx,
                    current: 0,
                    previous: 0,
                    window_seconds: window,
                },
                expires_at: now + 2.0 * window as f64,
                last_touch: now,
            })
        });
        let mut stored = entry.lock();
        if !matches!(stored.kind, SlotKind::Dual { .. }) {
            stored.kind = SlotKind::Dual {
                bucket_index: idx,
                current: 0,
                previous: 0,
                window_seconds: window,
            };
        }
        let SlotKind::Dual {
            bucket_index,
            current,
            previous,
            window_seconds,
        } = &mut stored.kind
        else {
            unreachable!()
        };
        roll_bucket(bucket_index, current, previous, idx);
        let elapsed_in_current = now - (idx as f64 * *window_seconds as f64);
        let weight_prev = 1.0 - elapsed_in_current / (*window_seconds as f64);
        let weighted = (*previous as f64 * weight_prev).floor() as u64 + *current;
        if weighted + amount > limit_amount {
            return Ok(false);
        }
        *current += amount;
        stored.last_touch = now;
        stored.expires_at = now + 2.0 * window as f64;
        Ok(true)
    }

    async fn get_sliding_window(&self, key: &str, expiry_seconds: u64) -> Result<(u64, u64, f64, f64)> {
        let now = self.now();
        let window = expiry_seconds.max(1);
        let idx = (now / window as f64).floor() as i64;
        let elapsed_in_current = now - (idx as f64 * window as f64);
        let reset_epoch = (idx + 1) as f64 * window as f64;
        let Some(entry) = self.data.get(key) else {
            return Ok((0, 0, elapsed_in_current, reset_epoch));
        };
        let stored = entry.lock();
        let SlotKind::Dual {
            bucket_index,
            current,
            previous,
            ..
        } = &stored.kind
        else {
            return Ok((0, 0, elapsed_in_current, reset_epoch));
        };
        let (current, previous) = match idx - bucket_index {
            0 => (*current, *previous),
            1 => (0, *current),
            _ => (0, 0),
        };
        Ok((current, previous, elapsed_in_current, reset_epoch))
    }
}

/// Shift the dual-bucket state forward to `new_index`, carrying `current`
/// into `previous` only if the roll is by exactly one window.
fn roll_bucket(bucket_index: &mut i64, current: &mut u64, previous: &mut u64, new_index: i64) {
    match new_index - *bucket_index {
        0 => {}
        1 => {
            *previous = *current;
            *current = 0;
            *bucket_index = new_index;
        }
        _ => {
            *previous = 0;
            *current = 0;
            *bucket_index = new_index;
        }
    }
}
