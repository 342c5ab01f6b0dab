//! Monotonic wall-clock time source, mockable for deterministic tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock seconds since the Unix epoch, as a float.
///
/// Every backend and strategy reads time through an injected `Clock` rather
/// than calling the system clock directly, so scenarios like "at t=0 hit
/// three times, at t=60 hit again" can be expressed without `sleep`.
pub trait Clock: Send + Sync + 'static {
    /// Current time in seconds since the Unix epoch.
    fn now(&self) -> f64;
}

/// Reads the real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_secs_f64()
    }
}

/// A clock whose value is set and advanced explicitly. Used by tests that
/// need exact, reproducible window boundaries.
#[derive(Debug, Default)]
pub struct MockClock {
    // f64 bits, so the clock can be shared across threads without a Mutex.
    bits: AtomicU64,
}

impl MockClock {
    pub fn new(now: f64) -> Self {
        Self {
            bits: AtomicU64::new(now.to_bits()),
        }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta_secs: f64) {
        let current = f64::from_bits(self.bits.load(Ordering::SeqCst));
        self.set(current + delta_secs);
    }
}

impl Clock for MockClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
