//! Redis storage backend.
//!
//! Counters use `INCRBY` plus a conditional `EXPIRE`, issued together from a
//! Lua script so the pair is atomic (§4.D). Moving-window entries use a
//! sorted set trimmed/counted/added inside one script. Sliding-window
//! counter state is two plain counter keys addressed by window index.

use deadpool_redis::redis::Script;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigurationError, StorageError};
use std::sync::Arc;

/// Counter incr+conditional-expire, atomic in one round trip.
///
/// KEYS[1] = counter key
/// ARGV[1] = amount, ARGV[2] = expiry_seconds, ARGV[3] = elastic_expiry (0/1)
const INCR_SCRIPT: &str = r#"
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
if tonumber(ARGV[3]) == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
elseif tonumber(value) == tonumber(ARGV[1]) then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return value
"#;

/// Trim-count-conditionally-add for the moving window, atomic in one script.
///
/// KEYS[1] = sorted set key
/// ARGV[1] = now, ARGV[2] = window_seconds, ARGV[3] = limit_amount
const ACQUIRE_ENTRY_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
if count < limit then
    local member = now .. ':' .. math.random()
    redis.call('ZADD', KEYS[1], now, member)
    redis.call('EXPIRE', KEYS[1], window)
    return 1
end
return 0
"#;

/// Conditional weighted-increment for the sliding-window counter, atomic
/// in one script: read both buckets, compute the weighted count, and only
/// apply `INCRBY` to the current bucket if admission would hold (§4.B/§4.I).
///
/// KEYS[1] = current bucket key, KEYS[2] = previous bucket key
/// ARGV[1] = weight_prev, ARGV[2] = amount, ARGV[3] = limit_amount, ARGV[4] = ttl_seconds
const ACQUIRE_SLIDING_WINDOW_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local previous = tonumber(redis.call('GET', KEYS[2]) or '0')
local weight_prev = tonumber(ARGV[1])
local amount = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])
local weighted = math.floor(previous * weight_prev) + current
if weighted + amount > limit then
    return 0
end
local new_value = redis.call('INCRBY', KEYS[1], amount)
if tonumber(new_value) == amount then
    redis.call('EXPIRE', KEYS[1], ttl)
end
return 1
"#;

const GET_MOVING_WINDOW_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
if count == 0 then
    return false
end
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
return {oldest[2], count}
"#;

/// Redis backend configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    key_prefix: String,
    wrap_exceptions: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            wrap_exceptions: false,
        }
    }
}

impl RedisConfig {
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_wrap_exceptions(mut self, wrap: bool) -> Self {
        self.wrap_exceptions = wrap;
        self
    }
}

/// Redis-backed storage. §1/§9: takes an already-built connection pool,
/// never a URI — this crate performs no URI parsing or registry lookup.
pub struct RedisStorage {
    pool: Pool,
    config: RedisConfig,
    clock: Arc<dyn Clock>,
}

impl RedisStorage {
    /// Build storage from an already-connected pool.
    pub fn new(pool: Pool, config: RedisConfig) -> Self {
        Self {
            pool,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Convenience constructor that builds a pool from a URL. Connectivity
    /// is verified immediately, so a bad URL fails fast as
    /// `ConfigurationError` (§8 invariant 7) rather than on first use.
    pub async fn from_url(
        url: impl Into<String>,
        config: RedisConfig,
    ) -> Result<Self, ConfigurationError> {
        let pool_config = PoolConfig::from_url(url.into());
        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConfigurationError::Invalid(e.to_string()))?;
        let storage = Self::new(pool, config);
        if !storage.check().await.unwrap_or(false) {
            return Err(ConfigurationError::Unreachable(
                "redis health probe failed".into(),
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

    async fn conn(&self) -> Result<deadpool_redis::Connection, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::from_backend(e, self.config.wrap_exceptions))
    }

    fn map_err(&self, e: deadpool_redis::redis::RedisError) -> StorageError {
        StorageError::from_backend(e, self.config.wrap_exceptions)
    }
}

impl super::Storage for RedisStorage {
    async fn incr(
        &self,
        key: &str,
        expiry_seconds: u64,
        elastic_expiry: bool,
        amount: u64,
    ) -> Result<u64, StorageError> {
        let mut conn = self.conn().await?;
        let value: i64 = Script::new(INCR_SCRIPT)
            .key(self.full_key(key))
            .arg(amount)
            .arg(expiry_seconds)
            .arg(if elastic_expiry { 1 } else { 0 })
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(value.max(0) as u64)
    }

    async fn decr(&self, key: &str, amount: u64) -> Result<u64, StorageError> {
        let mut conn = self.conn().await?;
        let value: i64 = deadpool_redis::redis::cmd("DECRBY")
            .arg(self.full_key(key))
            .arg(amount)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        if value < 0 {
            let _: i64 = deadpool_redis::redis::cmd("SET")
                .arg(self.full_key(key))
                .arg(0)
                .query_async(&mut conn)
                .await
                .map_err(|e| self.map_err(e))?;
            return Ok(0);
        }
        Ok(value as u64)
    }

    async fn get(&self, key: &str) -> Result<u64, StorageError> {
        let mut conn = self.conn().await?;
        let value: Option<i64> = deadpool_redis::redis::cmd("GET")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(value.unwrap_or(0).max(0) as u64)
    }

    async fn get_expiry(&self, key: &str) -> Result<f64, StorageError> {
        let mut conn = self.conn().await?;
        let ttl: i64 = deadpool_redis::redis::cmd("TTL")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        let now = self.clock.now();
        Ok(if ttl >= 0 { now + ttl as f64 } else { now })
    }

    async fn check(&self) -> Result<bool, StorageError> {
        let mut conn = self.conn().await?;
        let pong: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(pong == "PONG")
    }

    async fn reset(&self) -> Result<(), StorageError> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}*", self.config.key_prefix);
        let keys: Vec<String> = deadpool_redis::redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        if !keys.is_empty() {
            let _: i64 = deadpool_redis::redis::cmd("DEL")
                .arg(keys)
                .query_async(&mut conn)
                .await
                .map_err(|e| self.map_err(e))?;
        }
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.conn().await?;
        let _: i64 = deadpool_redis::redis::cmd("DEL")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(())
    }
}

impl super::MovingWindowStorage for RedisStorage {
    async fn acquire_entry(&self, key: &str, limit_amount: u64, expiry_seconds: u64) -> Result<bool, StorageError> {
        let mut conn = self.conn().await?;
        let now = self.clock.now();
        let admitted: i64 = Script::new(ACQUIRE_ENTRY_SCRIPT)
            .key(self.full_key(key))
            .arg(now)
            .arg(expiry_seconds)
            .arg(limit_amount)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(admitted == 1)
    }

    async fn get_moving_window(
        &self,
        key: &str,
        _limit_amount: u64,
        expiry_seconds: u64,
    ) -> Result<Option<(f64, u64)>, StorageError> {
        let mut conn = self.conn().await?;
        let now = self.clock.now();
        let result: Option<(f64, u64)> = Script::new(GET_MOVING_WINDOW_SCRIPT)
            .key(self.full_key(key))
            .arg(now)
            .arg(expiry_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(result)
    }
}

impl super::SlidingWindowCounterStorage for RedisStorage {
    async fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit_amount: u64,
        expiry_seconds: u64,
        amount: u64,
    ) -> Result<bool, StorageError> {
        let window = expiry_seconds.max(1);
        let now = self.clock.now();
        let idx = bucket_index(now, window);
        let elapsed = now - (idx as f64 * window as f64);
        let weight_prev = 1.0 - elapsed / window as f64;
        let previous_key = self.full_key(&format!("{}:c:{}", key, idx - 1));
        let current_key = self.full_key(&format!("{}:c:{}", key, idx));
        let mut conn = self.conn().await?;
        let admitted: i64 = Script::new(ACQUIRE_SLIDING_WINDOW_SCRIPT)
            .key(&current_key)
            .key(&previous_key)
            .arg(weight_prev)
            .arg(amount)
            .arg(limit_amount)
            .arg(2 * window)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(admitted == 1)
    }

    async fn get_sliding_window(&self, key: &str, expiry_seconds: u64) -> Result<(u64, u64, f64, f64), StorageError> {
        let window = expiry_seconds.max(1);
        let (current, previous, elapsed) = self.dual_bucket_state(key, expiry_seconds).await?;
        let idx = bucket_index(self.clock.now(), window);
        let reset_epoch = (idx + 1) as f64 * window as f64;
        Ok((current, previous, elapsed, reset_epoch))
    }
}

fn bucket_index(now: f64, window_seconds: u64) -> i64 {
    (now / window_seconds as f64).floor() as i64
}

impl RedisStorage {
    /// Read `(current, previous, elapsed_in_current)` for the sliding
    /// window counter, addressing both bucket counters by window index so
    /// no explicit roll bookkeeping is needed: the "previous" bucket is
    /// simply whichever counter key corresponds to `idx - 1`.
    async fn dual_bucket_state(&self, key: &str, expiry_seconds: u64) -> Result<(u64, u64, f64), StorageError> {
        let window = expiry_seconds.max(1);
        let now = self.clock.now();
        let idx = bucket_index(now, window);
        let elapsed = now - (idx as f64 * window as f64);
        let current_key = self.full_key(&format!("{}:c:{}", key, idx));
        let previous_key = self.full_key(&format!("{}:c:{}", key, idx - 1));
        let mut conn = self.conn().await?;
        let values: (Option<i64>, Option<i64>) = deadpool_redis::redis::cmd("MGET")
            .arg(&current_key)
            .arg(&previous_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        let current = values.0.unwrap_or(0).max(0) as u64;
        let previous = values.1.unwrap_or(0).max(0) as u64;
        Ok((current, previous, elapsed))
    }
}
