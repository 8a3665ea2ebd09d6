use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// A last-traded price observation for a canonical `BASE/QUOTE` pair.
///
/// `age()` is always a read-time projection — it is never stored, so a
/// `Price` sitting in the cache for an hour reports the same `amount` and
/// `timestamp` it was written with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub pair: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

impl Price {
    /// Builds a `Price`, enforcing the invariants from the data model:
    /// the pair is upper-cased and contains exactly one `/`, and the
    /// amount is strictly positive.
    pub fn new(pair: impl Into<String>, amount: f64, timestamp: DateTime<Utc>) -> Result<Self, ServiceError> {
        let pair = pair.into().trim().to_uppercase();
        if pair.matches('/').count() != 1 {
            return Err(ServiceError::InvalidPair(pair));
        }
        if !(amount > 0.0) {
            return Err(ServiceError::DecodeError(format!(
                "non-positive amount {amount} for pair {pair}"
            )));
        }
        Ok(Self { pair, amount, timestamp })
    }

    /// Duration since this price was observed, computed at call time.
    pub fn age(&self) -> ChronoDuration {
        Utc::now() - self.timestamp
    }
}

/// An entry in the price cache: a value plus its expiry instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Price,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(value: Price, ttl: ChronoDuration) -> Self {
        Self { expires_at: Utc::now() + ttl, value }
    }

    /// An entry is valid iff `now < expires_at`.
    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }

    /// An entry is valid-but-stale if it hasn't expired yet but its
    /// underlying observation is older than `max_age`. Used by the
    /// staleness watchdog, independent of TTL.
    pub fn is_stale(&self, max_age: ChronoDuration) -> bool {
        self.value.age() > max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_pair_without_exactly_one_slash() {
        assert!(Price::new("BTCUSD", 1.0, Utc::now()).is_err());
        assert!(Price::new("BTC/USD/X", 1.0, Utc::now()).is_err());
    }

    #[test]
    fn rejects_non_positive_amount() {
        assert!(Price::new("BTC/USD", 0.0, Utc::now()).is_err());
        assert!(Price::new("BTC/USD", -5.0, Utc::now()).is_err());
    }

    #[test]
    fn normalizes_case() {
        let p = Price::new("btc/usd", 50000.0, Utc::now()).unwrap();
        assert_eq!(p.pair, "BTC/USD");
    }

    #[test]
    fn entry_valid_until_ttl_elapses() {
        let price = Price::new("BTC/USD", 1.0, Utc::now()).unwrap();
        let entry = CacheEntry::new(price, ChronoDuration::seconds(-1));
        assert!(!entry.is_valid());
    }

    #[test]
    fn entry_stale_when_observation_older_than_max_age() {
        let old_timestamp = Utc::now() - ChronoDuration::seconds(120);
        let price = Price::new("BTC/USD", 1.0, old_timestamp).unwrap();
        let entry = CacheEntry::new(price, ChronoDuration::seconds(300));
        assert!(entry.is_valid());
        assert!(entry.is_stale(ChronoDuration::seconds(60)));
    }
}
