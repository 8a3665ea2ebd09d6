//! Staleness watchdog (C6): independent of cache TTL expiry, this
//! periodically checks every supported pair's cached observation age
//! and proactively refreshes any pair whose underlying price is older
//! than `max_age`, so a slow trickle of stream updates doesn't let a
//! technically-valid cache entry go stale without anyone noticing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheLookup, SharedCache};
use crate::exchange::FallbackExchange;

/// Background task: wakes on `interval`, checks every pair in
/// `watched_pairs` for staleness, and refreshes stale ones through the
/// fallback exchange so the next HTTP read finds a fresh value already
/// in the cache.
pub struct StalenessWatchdog {
    cache: SharedCache,
    exchange: Arc<FallbackExchange>,
    watched_pairs: Vec<String>,
    max_age: ChronoDuration,
    interval: Duration,
    cache_ttl: Duration,
}

impl StalenessWatchdog {
    pub fn new(
        cache: SharedCache,
        exchange: Arc<FallbackExchange>,
        watched_pairs: Vec<String>,
        max_age: Duration,
        interval: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            exchange,
            watched_pairs,
            max_age: ChronoDuration::from_std(max_age).unwrap_or_else(|_| ChronoDuration::zero()),
            interval,
            cache_ttl,
        }
    }

    /// Runs until `shutdown` is cancelled. Intended to be spawned once
    /// at startup alongside the HTTP server.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("staleness watchdog shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep(&shutdown).await;
                }
            }
        }
    }

    async fn sweep(&self, ctx: &CancellationToken) {
        let mut stale = Vec::new();
        for pair in &self.watched_pairs {
            match self.cache.get(pair).await {
                Ok(CacheLookup::Hit(price)) if price.age() > self.max_age => {
                    stale.push(pair.clone());
                }
                Ok(CacheLookup::Expired) | Ok(CacheLookup::Miss) => {
                    stale.push(pair.clone());
                }
                Ok(CacheLookup::Hit(_)) => {}
                Err(e) => {
                    tracing::warn!(pair = %pair, error = ?e, "staleness check failed to read cache");
                }
            }
        }

        if stale.is_empty() {
            return;
        }

        tracing::debug!(count = stale.len(), "staleness watchdog refreshing stale pairs");
        match self.exchange.get_tickers(ctx, &stale).await {
            Ok(prices) => {
                for price in prices {
                    if let Err(e) = self.cache.set(&price.pair, price.clone(), self.cache_ttl).await {
                        tracing::warn!(pair = %price.pair, error = ?e, "failed to persist watchdog refresh");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "staleness watchdog refresh failed, stale entries remain");
                metrics::counter!("watchdog_refresh_failures_total").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::models::Price;

    #[tokio::test]
    async fn identifies_nothing_stale_when_all_fresh() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let price = Price::new("BTC/USD", 50000.0, chrono::Utc::now()).unwrap();
        cache.set("BTC/USD", price, Duration::from_secs(60)).await.unwrap();

        match cache.get("BTC/USD").await.unwrap() {
            CacheLookup::Hit(p) => assert!(p.age() < ChronoDuration::seconds(5)),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn flags_old_observation_as_stale() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let old_timestamp = chrono::Utc::now() - ChronoDuration::seconds(120);
        let price = Price::new("BTC/USD", 50000.0, old_timestamp).unwrap();
        cache.set("BTC/USD", price, Duration::from_secs(600)).await.unwrap();

        match cache.get("BTC/USD").await.unwrap() {
            CacheLookup::Hit(p) => assert!(p.age() > ChronoDuration::seconds(60)),
            other => panic!("expected hit, got {other:?}"),
        }
    }
}
