//! The limit a strategy checks hits against: how many, over what window.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, Result};

/// An immutable `(amount, window_seconds)` pair with a human-readable
/// granularity label used in the storage key namespace (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    amount: u64,
    window_seconds: u64,
    granularity_name: String,
}

impl Limit {
    /// # Panics
    /// Panics if `amount` or `window_seconds` is zero.
    pub fn new(amount: u64, window_seconds: u64, granularity_name: impl Into<String>) -> Self {
        assert!(amount > 0, "amount must be greater than 0");
        assert!(window_seconds > 0, "window_seconds must be greater than 0");
        Self {
            amount,
            window_seconds,
            granularity_name: granularity_name.into(),
        }
    }

    pub fn try_new(
        amount: u64,
        window_seconds: u64,
        granularity_name: impl Into<String>,
    ) -> Result<Self> {
        if amount == 0 {
            return Err(ConfigurationError::Invalid("amount must be greater than 0".into()).into());
        }
        if window_seconds == 0 {
            return Err(
                ConfigurationError::Invalid("window_seconds must be greater than 0".into()).into(),
            );
        }
        Ok(Self {
            amount,
            window_seconds,
            granularity_name: granularity_name.into(),
        })
    }

    pub fn per_second(amount: u64) -> Self {
        Self::new(amount, 1, "second")
    }

    pub fn per_minute(amount: u64) -> Self {
        Self::new(amount, 60, "minute")
    }

    pub fn per_hour(amount: u64) -> Self {
        Self::new(amount, 3600, "hour")
    }

    pub fn per_day(amount: u64) -> Self {
        Self::new(amount, 86400, "day")
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn granularity_name(&self) -> &str {
        &self.granularity_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_second_shape() {
        let limit = Limit::per_second(10);
        assert_eq!(limit.amount(), 10);
        assert_eq!(limit.window_seconds(), 1);
        assert_eq!(limit.granularity_name(), "second");
    }

    #[test]
    fn per_minute_shape() {
        let limit = Limit::per_minute(60);
        assert_eq!(limit.window_seconds(), 60);
    }

    #[test]
    fn try_new_rejects_zero_amount() {
        assert!(Limit::try_new(0, 60, "minute").is_err());
    }

    #[test]
    fn try_new_rejects_zero_window() {
        assert!(Limit::try_new(10, 0, "custom").is_err());
    }

    #[test]
    #[should_panic]
    fn new_panics_on_zero_amount() {
        Limit::new(0, 60, "minute");
    }

    #[test]
    #[should_panic]
    fn new_panics_on_zero_window() {
        Limit::new(10, 0, "custom");
    }
}
