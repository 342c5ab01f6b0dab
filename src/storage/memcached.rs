//! Memcached storage backend.
//!
//! Memcached has no server-side scripting, so atomicity comes from `add`
//! (create-if-absent), `incr` (fails if absent), and CAS (`gets`+`cas`).
//! Counters are `add`-then-`incr`; moving-window entries are a
//! read-modify-write CAS loop bounded by [`MAX_CAS_RETRIES`], since an
//! unbounded retry loop could spin forever under contention (§4.E).
//!
//! No corpus example uses Memcached from Rust; this backend is grounded on
//! [`super::redis::RedisStorage`]'s config/pool/serde shape and the protocol
//! described in the spec this crate implements (see `DESIGN.md`).

use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConcurrentUpdateError, ConfigurationError, StorageError};

/// A CAS-loop retry budget is exhausted after this many attempts,
/// surfacing a `ConcurrentUpdateError` rather than spinning forever.
pub const MAX_CAS_RETRIES: u32 = 10;

#[derive(Debug, Clone)]
pub struct MemcachedConfig {
    key_prefix: String,
    wrap_exceptions: bool,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            wrap_exceptions: false,
        }
    }
}

impl MemcachedConfig {
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_wrap_exceptions(mut self, wrap: bool) -> Self {
        self.wrap_exceptions = wrap;
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
struct EntryList {
    // newest-first, matching the memory backend's canonical ordering.
    timestamps: Vec<f64>,
}

/// Memcached-backed storage. §9: the client is pooled rather than
/// thread-local, since thread-locals don't compose with an async runtime
/// where "current thread" isn't stable across `.await` points.
pub struct MemcachedStorage {
    pool: Arc<SyncMutex<memcache::Client>>,
    config: MemcachedConfig,
    clock: Arc<dyn Clock>,
}

impl MemcachedStorage {
    pub fn new(client: memcache::Client, config: MemcachedConfig) -> Self {
        Self {
            pool: Arc::new(SyncMutex::new(client)),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub async fn connect(urls: &[&str], config: MemcachedConfig) -> Result<Self, ConfigurationError> {
        let client = memcache::Client::connect(urls.join(","))
            .map_err(|e| ConfigurationError::Unreachable(e.to_string()))?;
        let storage = Self::new(client, config);
        if !storage.check().await.unwrap_or(false) {
            return Err(ConfigurationError::Unreachable(
                "memcached health probe failed".into(),
            ));
        }
        Ok(storage)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Every blocking `memcache` client call runs on a blocking-pool thread
    /// so it never stalls the async runtime's reactor.
    async fn with_client<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut memcache::Client) -> Result<T, memcache::MemcacheError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        let wrap = self.config.wrap_exceptions;
        tokio::task::spawn_blocking(move || {
            let mut client = pool.lock();
            f(&mut client).map_err(|e| StorageError::from_backend(e, wrap))
        })
        .await
        .map_err(|e| StorageError::Unavailable(e.to_string()))?
    }
}

impl super::Storage for MemcachedStorage {
    async fn incr(&self, key: &str, expiry_seconds: u64, elastic_expiry: bool, amount: u64) -> Result<u64, StorageError> {
        let full_key = self.full_key(key);
        let exp = expiry_seconds as u32;
        let value = self
            .with_client(move |client| {
                let _ = client.add(&full_key, 0u64, exp);
                let value = client.increment(&full_key, amount)?;
                Ok(value)
            })
            .await?;
        if elastic_expiry {
            let full_key = self.full_key(key);
            self.with_client(move |client| client.touch(&full_key, exp)).await?;
        }
        Ok(value)
    }

    async fn decr(&self, key: &str, amount: u64) -> Result<u64, StorageError> {
        let full_key = self.full_key(key);
        match self
            .with_client(move |client| client.decrement(&full_key, amount))
            .await
        {
            Ok(value) => Ok(value),
            Err(_) => Ok(0),
        }
    }

    async fn get(&self, key: &str) -> Result<u64, StorageError> {
        let full_key = self.full_key(key);
        let value = self
            .with_client(move |client| client.get::<u64>(&full_key))
            .await?;
        Ok(value.unwrap_or(0))
    }

    async fn get_expiry(&self, _key: &str) -> Result<f64, StorageError> {
        // Memcached exposes no TTL introspection API; callers that need an
        // exact reset time should prefer a backend with TTL visibility.
        Ok(self.clock.now())
    }

    async fn check(&self) -> Result<bool, StorageError> {
        self.with_client(|client| client.version().map(|_| ())).await?;
        Ok(true)
    }

    async fn reset(&self) -> Result<(), StorageError> {
        self.with_client(move |client| client.flush()).await
    }

    async fn clear(&self, key: &str) -> Result<(), StorageError> {
        let full_key = self.full_key(key);
        match self.with_client(move |client| client.delete(&full_key)).await {
            Ok(_) => Ok(()),
            Err(_) => Ok(()),
        }
    }
}

impl super::MovingWindowStorage for MemcachedStorage {
    async fn acquire_entry(&self, key: &str, limit_amount: u64, expiry_seconds: u64) -> Result<bool, StorageError> {
        let now = self.clock.now();
        let cutoff = now - expiry_seconds as f64;
        let full_key = self.full_key(key);
        let exp = expiry_seconds as u32;

        for _ in 0..MAX_CAS_RETRIES {
            let key_for_read = full_key.clone();
            let (mut list, cas_id) = self
                .with_client(move |client| {
                    client
                        .gets::<Vec<u8>>(&key_for_read)
                        .map(|opt| match opt {
                            Some((bytes, cas)) => (
                                serde_json::from_slice::<EntryList>(&bytes).unwrap_or_default(),
                                Some(cas),
                            ),
                            None => (EntryList::default(), None),
                        })
                })
                .await?;

            list.timestamps.retain(|&t| t > cutoff);
            if (list.timestamps.len() as u64) >= limit_amount {
                return Ok(false);
            }
            list.timestamps.insert(0, now);
            let payload = serde_json::to_vec(&list)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            let key_for_write = full_key.clone();
            let won = match cas_id {
                Some(cas) => {
                    self.with_client(move |client| client.cas(&key_for_write, &payload, exp, cas))
                        .await?
                }
                None => {
                    self.with_client(move |client| client.add(&key_for_write, &payload, exp).map(|_| true))
                        .await
                        .unwrap_or(false)
                }
            };
            if won {
                return Ok(true);
            }
        }
        Err(ConcurrentUpdateError(format!(
            "memcached CAS retries exhausted for {full_key}"
        ))
        .into())
    }

    async fn get_moving_window(
        &self,
        key: &str,
        _limit_amount: u64,
        expiry_seconds: u64,
    ) -> Result<Option<(f64, u64)>, StorageError> {
        let now = self.clock.now();
        let cutoff = now - expiry_seconds as f64;
        let full_key = self.full_key(key);
        let bytes = self
            .with_client(move |client| client.get::<Vec<u8>>(&full_key))
            .await?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let list: EntryList = serde_json::from_slice(&bytes).unwrap_or_default();
        let mut count = 0u64;
        let mut oldest = None;
        for &t in &list.timestamps {
            if t > cutoff {
                count += 1;
                oldest = Some(t);
            }
        }
        Ok(oldest.map(|o| (o, count)))
    }
}

impl super::SlidingWindowCounterStorage for MemcachedStorage {
    async fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit_amount: u64,
        expiry_seconds: u64,
        amount: u64,
    ) -> Result<bool, StorageError> {
        // `previous` is read outside the CAS loop: per §4.I a race on it
        // only causes a transient undercount, self-corrected on the next
        // bucket read. `current` is gated behind a CAS loop, same shape as
        // `acquire_entry`'s, because admission and mutation must be one
        // atomic step there.
        let window = expiry_seconds.max(1);
        let now = self.clock.now();
        let idx = (now / window as f64).floor() as i64;
        let elapsed = now - (idx as f64 * window as f64);
        let previous_key = self.full_key(&format!("{key}:c:{}", idx - 1));
        let current_key = self.full_key(&format!("{key}:c:{idx}"));
        let weight_prev = 1.0 - elapsed / window as f64;

        let previous = self
            .with_client({
                let previous_key = previous_key.clone();
                move |client| client.get::<u64>(&previous_key)
            })
            .await?
            .unwrap_or(0);
        let carried = (previous as f64 * weight_prev).floor() as u64;

        let exp = (2 * window) as u32;
        for _ in 0..MAX_CAS_RETRIES {
            let key_for_read = current_key.clone();
            let (current, cas_id) = self
                .with_client(move |client| client.gets::<u64>(&key_for_read))
                .await?
                .map_or((0u64, None), |(v, cas)| (v, Some(cas)));
            if carried + current + amount > limit_amount {
                return Ok(false);
            }
            let new_value = current + amount;
            let key_for_write = current_key.clone();
            let won = match cas_id {
                Some(cas) => {
                    self.with_client(move |client| client.cas(&key_for_write, new_value, exp, cas))
                        .await?
                }
                None => {
                    self.with_client(move |client| client.add(&key_for_write, new_value, exp).map(|_| true))
                        .await
                        .unwrap_or(false)
                }
            };
            if won {
                return Ok(true);
            }
        }
        Err(ConcurrentUpdateError(format!(
            "memcached CAS retries exhausted for {current_key}"
        ))
        .into())
    }

    async fn get_sliding_window(&self, key: &str, expiry_seconds: u64) -> Result<(u64, u64, f64, f64), StorageError> {
        let window = expiry_seconds.max(1);
        let now = self.clock.now();
        let idx = (now / window as f64).floor() as i64;
        let elapsed = now - (idx as f64 * window as f64);
        let reset_epoch = (idx + 1) as f64 * window as f64;
        let current_key = self.full_key(&format!("{key}:c:{idx}"));
        let previous_key = self.full_key(&format!("{key}:c:{}", idx - 1));

        let current = self
            .with_client({
                let current_key = current_key.clone();
                move |client| client.get::<u64>(&current_key)
            })
            .await?
            .unwrap_or(0);
        let previous = self
            .with_client({
                let previous_key = previous_key.clone();
                move |client| client.get::<u64>(&previous_key)
            })
            .await?
            .unwrap_or(0);

        Ok((current, previous, elapsed, reset_epoch))
    }
}
