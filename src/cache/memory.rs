use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use dashmap::DashMap;

use super::{CacheLookup, PriceCacheBackend};
use crate::errors::CacheError;
use crate::models::{CacheEntry, Price};

/// How many writes between opportunistic full sweeps of expired keys.
const SWEEP_EVERY_N_WRITES: u64 = 32;

/// In-process TTL cache, mirroring the shape of the teacher's
/// `OrderBookStore` (a cloneable handle around `Arc<DashMap<..>>`)
/// generalized from order books to TTL-aware price entries.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Arc<DashMap<String, CacheEntry>>,
    writes: Arc<AtomicU64>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    fn maybe_sweep(&self) {
        let count = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if count % SWEEP_EVERY_N_WRITES == 0 {
            self.inner.retain(|_, entry| entry.is_valid());
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceCacheBackend for MemoryCache {
    async fn get(&self, pair: &str) -> Result<CacheLookup, CacheError> {
        let Some(entry) = self.inner.get(pair) else {
            return Ok(CacheLookup::Miss);
        };
        if !entry.is_valid() {
            drop(entry);
            self.inner.remove(pair);
            return Ok(CacheLookup::Expired);
        }
        Ok(CacheLookup::Hit(entry.value.clone()))
    }

    async fn set(&self, pair: &str, price: Price, ttl: Duration) -> Result<(), CacheError> {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::zero());
        self.inner.insert(pair.to_string(), CacheEntry::new(price, ttl));
        self.maybe_sweep();
        Ok(())
    }

    async fn delete(&self, pair: &str) -> Result<(), CacheError> {
        self.inner.remove(pair);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn miss_on_empty_cache() {
        let cache = MemoryCache::new();
        assert!(matches!(cache.get("BTC/USD").await.unwrap(), CacheLookup::Miss));
    }

    #[tokio::test]
    async fn hit_after_set() {
        let cache = MemoryCache::new();
        let price = Price::new("BTC/USD", 50000.0, chrono::Utc::now()).unwrap();
        cache.set("BTC/USD", price.clone(), Duration::from_secs(30)).await.unwrap();
        match cache.get("BTC/USD").await.unwrap() {
            CacheLookup::Hit(p) => assert_eq!(p, price),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_after_negative_ttl() {
        let cache = MemoryCache::new();
        let price = Price::new("BTC/USD", 50000.0, chrono::Utc::now()).unwrap();
        // a "ttl" that has already elapsed — Duration can't be negative,
        // so simulate by subtracting directly on the chrono side via a
        // zero std ttl combined with a stale timestamp is not needed:
        // inserting with ttl=0 and then reading after any wall-clock
        // progress is enough to observe expiry.
        cache.set("BTC/USD", price, Duration::from_millis(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(cache.get("BTC/USD").await.unwrap(), CacheLookup::Expired));
    }

    #[tokio::test]
    async fn expiry_is_opportunistically_removed_on_read() {
        let cache = MemoryCache::new();
        let price = Price::new("BTC/USD", 50000.0, chrono::Utc::now()).unwrap();
        cache.set("BTC/USD", price, Duration::from_millis(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = cache.get("BTC/USD").await.unwrap();
        assert!(cache.inner.get("BTC/USD").is_none());
    }

    #[tokio::test]
    async fn get_many_preserves_order_and_splits_misses() {
        let cache = MemoryCache::new();
        let btc = Price::new("BTC/USD", 50000.0, chrono::Utc::now()).unwrap();
        let eth = Price::new("ETH/USD", 3000.0, chrono::Utc::now()).unwrap();
        cache.set("BTC/USD", btc.clone(), Duration::from_secs(30)).await.unwrap();
        cache.set("ETH/USD", eth.clone(), Duration::from_secs(30)).await.unwrap();

        let pairs = vec!["BTC/USD".to_string(), "DOGE/USD".to_string(), "ETH/USD".to_string()];
        let (hits, misses) = cache.get_many(&pairs).await.unwrap();
        assert_eq!(hits, vec![btc, eth]);
        assert_eq!(misses, vec!["DOGE/USD".to_string()]);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = MemoryCache::new();
        let price = Price::new("BTC/USD", 50000.0, chrono::Utc::now()).unwrap();
        cache.set("BTC/USD", price, Duration::from_secs(30)).await.unwrap();
        cache.delete("BTC/USD").await.unwrap();
        assert!(matches!(cache.get("BTC/USD").await.unwrap(), CacheLookup::Miss));
    }
}
