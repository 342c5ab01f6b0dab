//! Error types for the rate limiting core.
//!
//! Three kinds, matching who is expected to handle what (§7): a
//! [`ConfigurationError`] can only come from a backend constructor, a
//! [`StorageError`] is everything that can go wrong talking to a backend
//! afterwards, and [`ConcurrentUpdateError`] is the specific shape of
//! storage failure where a backend's own optimistic-concurrency retry
//! budget was exhausted.

use thiserror::Error;

/// Result type used throughout the storage and strategy layers.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Failures that can only happen while constructing a backend: invalid
/// configuration, or a client that fails its health probe before the
/// backend is ever handed to a strategy.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("backend unreachable during construction: {0}")]
    Unreachable(String),

    #[error("missing required configuration: {0}")]
    MissingRequired(String),
}

/// A backend's own optimistic-concurrency retry budget was exhausted:
/// MongoDB write conflicts surviving its internal retry loop, or a
/// Memcached CAS loop hitting `MAX_CAS_RETRIES` without winning.
#[derive(Debug, Error)]
#[error("write conflict after retry budget exhausted: {0}")]
pub struct ConcurrentUpdateError(pub String);

/// Anything that can go wrong talking to a backend after it was
/// constructed. Strategies never catch this; `hit`/`test`/`get_window_stats`
/// propagate it directly to the caller (§7).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached (connection dropped, pool
    /// exhausted, health probe failed).
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// An operation did not complete within its deadline.
    #[error("operation timed out")]
    Timeout,

    /// A stored entry could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A backend's retry budget (CAS loop, transaction retry) was
    /// exhausted by concurrent writers.
    #[error("{0}")]
    ConcurrentUpdate(#[from] ConcurrentUpdateError),

    /// The connection pool has no available connections.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// A backend-native error, preserved as-is because `wrap_exceptions`
    /// is `false` (§6) — inspect via `source()`/downcast, not `{0}`.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::PoolExhausted | Self::ConcurrentUpdate(_)
        )
    }

    /// Wrap a backend-native error, collapsing it into a coarse category
    /// when `wrap_exceptions` is `true`, or preserving it untouched
    /// (`Self::Backend`) when `false` (§6).
    pub fn from_backend<E>(err: E, wrap_exceptions: bool) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if wrap_exceptions {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(Box::new(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(StorageError::Timeout.is_retryable());
        assert!(StorageError::PoolExhausted.is_retryable());
        assert!(!StorageError::Unavailable("down".into()).is_retryable());
    }

    #[test]
    fn concurrent_update_converts_into_storage_error() {
        let err: StorageError = ConcurrentUpdateError("mongo write conflict".into()).into();
        assert!(matches!(err, StorageError::ConcurrentUpdate(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn from_backend_respects_wrap_exceptions() {
        #[derive(Debug, Error)]
        #[error("boom")]
        struct Boom;

        let wrapped = StorageError::from_backend(Boom, true);
        assert!(matches!(wrapped, StorageError::Unavailable(_)));

        let raw = StorageError::from_backend(Boom, false);
        assert!(matches!(raw, StorageError::Backend(_)));
    }
}
