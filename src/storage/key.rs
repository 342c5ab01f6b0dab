//! Storage key namespacing (§6): `LIMITER/{strategy_tag}/{granularity}/{fragments...}`.

use crate::identity::Identity;
use crate::limit::Limit;

/// Tag identifying which strategy owns a key, so the three strategies
/// never collide even when given the same limit/identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyTag {
    Fixed,
    MovingWindow,
    SlidingWindowCounter,
}

impl StrategyTag {
    fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::MovingWindow => "mw",
            Self::SlidingWindowCounter => "swc",
        }
    }
}

/// Build the namespaced storage key for one `(strategy, limit, identity)`.
pub fn build_key(tag: StrategyTag, limit: &Limit, identity: &Identity) -> String {
    let mut key = format!("LIMITER/{}/{}", tag.as_str(), limit.granularity_name());
    for fragment in identity.fragments() {
        key.push('/');
        key.push_str(fragment);
    }
    key
}
