//! MongoDB storage backend.
//!
//! Counters are `findOneAndUpdate` with `$inc` and `upsert: true`, relying
//! on a TTL index on `expires_at` (set once via `$setOnInsert`) for
//! reclamation. Moving-window entries are one document per key holding an
//! array of timestamps, trimmed/checked/pushed by a single aggregation
//! pipeline `findOneAndUpdate` so the whole operation is atomic from the
//! client's perspective (§4.F).
//!
//! No corpus example uses MongoDB from Rust; this backend is grounded on
//! [`super::redis::RedisStorage`]'s config/pool shape, using the official
//! `mongodb` driver for the concerns that crate covers (connection
//! pooling, BSON serialization) the way the teacher uses `deadpool-redis`
//! for Redis (see `DESIGN.md`).

use std::sync::Arc;

use mongodb::bson::{doc, Bson};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::Collection;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConcurrentUpdateError, ConfigurationError, StorageError};

/// MongoDB write conflicts surviving the driver's own retryable-writes
/// layer are retried this many times before surfacing as
/// `ConcurrentUpdateError`.
pub const MAX_WRITE_CONFLICT_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct MongoConfig {
    wrap_exceptions: bool,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            wrap_exceptions: false,
        }
    }
}

impl MongoConfig {
    pub fn with_wrap_exceptions(mut self, wrap: bool) -> Self {
        self.wrap_exceptions = wrap;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CounterDoc {
    #[serde(rename = "_id")]
    id: String,
    value: u64,
    expires_at: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SlidingCounterDoc {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    value: u64,
    #[serde(default)]
    admitted: bool,
    #[serde(default)]
    expires_at: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryDoc {
    #[serde(rename = "_id")]
    id: String,
    timestamps: Vec<f64>,
    /// Set by the `acquire_entry` pipeline itself to whether *this* call's
    /// timestamp was pushed, so the client can report admit/deny without a
    /// separate (non-atomic) read-then-write.
    #[serde(default)]
    admitted: bool,
}

/// MongoDB-backed storage. §1/§9: takes an already-connected collection
/// handle; this crate never parses a `mongodb://` URI itself.
pub struct MongoStorage {
    counters: Collection<CounterDoc>,
    entries: Collection<EntryDoc>,
    config: MongoConfig,
    clock: Arc<dyn Clock>,
}

impl MongoStorage {
    /// `counters` and `entries` should each have a TTL index on
    /// `expires_at` / an equivalent field with `expireAfterSeconds: 0`,
    /// created once out-of-band during deployment.
    pub fn new(
        counters: Collection<CounterDoc>,
        entries: Collection<EntryDoc>,
        config: MongoConfig,
    ) -> Self {
        Self {
            counters,
            entries,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn verify_connectivity(&self) -> Result<(), ConfigurationError> {
        self.counters
            .estimated_document_count()
            .await
            .map_err(|e| ConfigurationError::Unreachable(e.to_string()))?;
        Ok(())
    }

    fn map_err(&self, e: mongodb::error::Error) -> StorageError {
        StorageError::from_backend(e, self.config.wrap_exceptions)
    }
}

impl super::Storage for MongoStorage {
    async fn incr(&self, key: &str, expiry_seconds: u64, elastic_expiry: bool, amount: u64) -> Result<u64, StorageError> {
        let now = self.clock.now();
        let expires_at = now + expiry_seconds as f64;
        let mut update = doc! {
            "$inc": { "value": amount as i64 },
            "$setOnInsert": { "_id": key },
        };
        if elastic_expiry {
            update.insert("$set", doc! { "expires_at": expires_at });
        } else {
            update.insert(
                "$setOnInsert",
                doc! { "_id": key, "expires_at": expires_at },
            );
        }
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        for _ in 0..MAX_WRITE_CONFLICT_RETRIES {
            // A window rollover resets the counter: detect it by reading
            // first, and if `expires_at` has passed, replace rather than
            // increment, in one findOneAndUpdate.
            let existing = self
                .counters
                .find_one(doc! { "_id": key })
                .await
                .map_err(|e| self.map_err(e))?;
            let expired = existing.as_ref().is_some_and(|c| c.expires_at <= now);

            let result = if expired {
                self.counters
                    .find_one_and_update(
                        doc! { "_id": key },
                        doc! { "$set": { "value": amount as i64, "expires_at": expires_at } },
                    )
                    .with_options(options.clone())
                    .await
            } else {
                self.counters
                    .find_one_and_update(doc! { "_id": key }, update.clone())
                    .with_options(options.clone())
                    .await
            };

            match result {
                Ok(Some(doc)) => return Ok(doc.value),
                Ok(None) => continue,
                Err(e) if e.contains_label("TransientTransactionError") => continue,
                Err(e) => return Err(self.map_err(e)),
            }
        }
        Err(ConcurrentUpdateError(format!(
            "mongodb write conflict retries exhausted for {key}"
        ))
        .into())
    }

    async fn decr(&self, key: &str, amount: u64) -> Result<u64, StorageError> {
        let result = self
            .counters
            .find_one_and_update(
                doc! { "_id": key },
                doc! { "$inc": { "value": -(amount as i64) } },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| self.map_err(e))?;
        match result {
            Some(doc) if doc.value > 0 => Ok(doc.value),
            _ => Ok(0),
        }
    }

    async fn get(&self, key: &str) -> Result<u64, StorageError> {
        let now = self.clock.now();
        let doc = self
            .counters
            .find_one(doc! { "_id": key })
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(match doc {
            Some(c) if c.expires_at > now => c.value,
            _ => 0,
        })
    }

    async fn get_expiry(&self, key: &str) -> Result<f64, StorageError> {
        let now = self.clock.now();
        let doc = self
            .counters
            .find_one(doc! { "_id": key })
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(match doc {
            Some(c) if c.expires_at > now => c.expires_at,
            _ => now,
        })
    }

    async fn check(&self) -> Result<bool, StorageError> {
        self.counters
            .estimated_document_count()
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(true)
    }

    async fn reset(&self) -> Result<(), StorageError> {
        self.counters
            .delete_many(doc! {})
            .await
            .map_err(|e| self.map_err(e))?;
        self.entries
            .delete_many(doc! {})
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), StorageError> {
        self.counters
            .delete_one(doc! { "_id": key })
            .await
            .map_err(|e| self.map_err(e))?;
        self.entries
            .delete_one(doc! { "_id": key })
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(())
    }
}

impl super::MovingWindowStorage for MongoStorage {
    async fn acquire_entry(&self, key: &str, limit_amount: u64, expiry_seconds: u64) -> Result<bool, StorageError> {
        let now = self.clock.now();
        let cutoff = now - expiry_seconds as f64;

        // A single aggregation-pipeline `findOneAndUpdate`: trim expired
        // entries, decide admission from the trimmed length, and
        // conditionally push — all server-side so trim-check-push is
        // atomic from the client's perspective. The decision is recorded
        // in the document itself (`admitted`) rather than inferred from
        // `updated.is_some()`, which is always `Some` under `upsert: true`
        // regardless of whether the push happened.
        let pipeline = vec![
            doc! {
                "$set": {
                    "timestamps": {
                        "$filter": {
                            "input": { "$ifNull": ["$timestamps", []] },
                            "cond": { "$gt": ["$$this", cutoff] },
                        }
                    }
                }
            },
            doc! {
                "$set": {
                    "admitted": { "$lt": [{ "$size": "$timestamps" }, limit_amount as i64] },
                }
            },
            doc! {
                "$set": {
                    "timestamps": {
                        "$cond": [
                            "$admitted",
                            { "$concatArrays": [[now], "$timestamps"] },
                            "$timestamps",
                        ]
                    }
                }
            },
        ];

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .entries
            .find_one_and_update(doc! { "_id": key }, pipeline)
            .with_options(options)
            .await
            .map_err(|e| self.map_err(e))?;

        Ok(updated.is_some_and(|d| d.admitted))
    }

    async fn get_moving_window(
        &self,
        key: &str,
        _limit_amount: u64,
        expiry_seconds: u64,
    ) -> Result<Option<(f64, u64)>, StorageError> {
        let now = self.clock.now();
        let cutoff = now - expiry_seconds as f64;
        let doc = self
            .entries
            .find_one(doc! { "_id": key })
            .await
            .map_err(|e| self.map_err(e))?;
        let Some(doc) = doc else {
            return Ok(None);
        };
        let mut count = 0u64;
        let mut oldest = None;
        for &t in &doc.timestamps {
            if t > cutoff {
                count += 1;
                oldest = Some(t);
            }
        }
        Ok(oldest.map(|o| (o, count)))
    }
}

impl super::SlidingWindowCounterStorage for MongoStorage {
    async fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit_amount: u64,
        expiry_seconds: u64,
        amount: u64,
    ) -> Result<bool, StorageError> {
        let window = expiry_seconds.max(1);
        let now = self.clock.now();
        let idx = (now / window as f64).floor() as i64;
        let elapsed = now - (idx as f64 * window as f64);
        let weight_prev = 1.0 - elapsed / window as f64;

        let current_key = format!("{key}:c:{idx}");
        let previous_key = format!("{key}:c:{}", idx - 1);

        // `previous` is read separately, outside the atomic step on
        // `current`: per §4.I a race on it only causes a transient
        // undercount, self-corrected once that bucket is itself current.
        let previous = self.sliding_bucket_value(&previous_key).await?;
        let carried = (previous as f64 * weight_prev).floor() as i64;

        // One aggregation-pipeline `findOneAndUpdate` on the current
        // bucket: compute `admitted` from the carried-over weight plus the
        // document's own value, and conditionally `$inc` in the same
        // atomic step, the same pattern `acquire_entry` uses for the
        // moving window's trim-check-push.
        let bucket_expires_at = now + 2.0 * window as f64;
        let pipeline = vec![
            doc! {
                "$set": {
                    "admitted": {
                        "$lte": [
                            { "$add": [carried, { "$ifNull": ["$value", 0] }, amount as i64] },
                            limit_amount as i64,
                        ]
                    }
                }
            },
            doc! {
                "$set": {
                    "value": {
                        "$cond": [
                            "$admitted",
                            { "$add": [{ "$ifNull": ["$value", 0] }, amount as i64] },
                            { "$ifNull": ["$value", 0] },
                        ]
                    },
                    "expires_at": { "$ifNull": ["$expires_at", bucket_expires_at] },
                }
            },
        ];

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let sliding_counters = self.counters.clone_with_type::<SlidingCounterDoc>();
        let updated = sliding_counters
            .find_one_and_update(doc! { "_id": &current_key }, pipeline)
            .with_options(options)
            .await
            .map_err(|e| self.map_err(e))?;

        Ok(updated.is_some_and(|d| d.admitted))
    }

    async fn get_sliding_window(&self, key: &str, expiry_seconds: u64) -> Result<(u64, u64, f64, f64), StorageError> {
        let window = expiry_seconds.max(1);
        let now = self.clock.now();
        let idx = (now / window as f64).floor() as i64;
        let elapsed = now - (idx as f64 * window as f64);
        let reset_epoch = (idx + 1) as f64 * window as f64;
        let current = self.sliding_bucket_value(&format!("{key}:c:{idx}")).await?;
        let previous = self.sliding_bucket_value(&format!("{key}:c:{}", idx - 1)).await?;
        Ok((current, previous, elapsed, reset_epoch))
    }
}

impl MongoStorage {
    /// Read one sliding-window bucket's raw count, `0` if absent or
    /// expired. Separate from [`super::Storage::get`] because sliding
    /// buckets are stored via [`SlidingCounterDoc`], not [`CounterDoc`].
    async fn sliding_bucket_value(&self, bucket_key: &str) -> Result<u64, StorageError> {
        let now = self.clock.now();
        let sliding_counters = self.counters.clone_with_type::<SlidingCounterDoc>();
        let doc = sliding_counters
            .find_one(doc! { "_id": bucket_key })
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(match doc {
            Some(d) if d.expires_at == 0.0 || d.expires_at > now => d.value,
            _ => 0,
        })
    }
}
