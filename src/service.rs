//! Price service (C7): the cache-only read contract sits here. `get_last_price`
//! and `get_cached_prices` never touch the network — a miss is a miss,
//! full stop. Only `refresh_prices` is allowed to call out to the
//! exchange, and it's invoked by the HTTP refresh endpoint and the
//! startup warmup, never implicitly by a read.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::{CacheLookup, SharedCache};
use crate::errors::ServiceError;
use crate::exchange::FallbackExchange;
use crate::models::Price;
use crate::pairs;

pub struct PriceService {
    cache: SharedCache,
    exchange: Arc<FallbackExchange>,
    cache_ttl: Duration,
    supported_pairs: Vec<String>,
}

impl PriceService {
    pub fn new(cache: SharedCache, exchange: Arc<FallbackExchange>, cache_ttl: Duration, supported_pairs: Vec<String>) -> Self {
        Self { cache, exchange, cache_ttl, supported_pairs }
    }

    pub fn is_supported(&self, pair: &str) -> bool {
        let upper = pair.to_uppercase();
        self.supported_pairs.iter().any(|p| p.eq_ignore_ascii_case(&upper))
    }

    pub fn supported_pairs(&self) -> &[String] {
        &self.supported_pairs
    }

    /// Readiness probe for `GET /ready`: the cache backend itself must
    /// answer, regardless of whether it has anything cached yet. A
    /// miss is healthy; a backend error (e.g. Redis unreachable) is
    /// not.
    pub async fn is_ready(&self) -> bool {
        let Some(pair) = self.supported_pairs.first() else {
            return true;
        };
        self.cache.get(pair).await.is_ok()
    }

    /// Cache-only read. Returns `PriceUnavailable` on both `Miss` and
    /// `Expired` — the caller can't tell which occurred, by design,
    /// since both mean "nothing fresh enough to serve."
    pub async fn get_last_price(&self, pair: &str) -> Result<Price, ServiceError> {
        pairs::split_canonical(pair)?;
        let canonical = pair.to_uppercase();

        if !self.is_supported(&canonical) {
            return Err(ServiceError::InvalidPair(canonical));
        }

        match self.cache.get(&canonical).await.map_err(ServiceError::from)? {
            CacheLookup::Hit(price) => Ok(price),
            CacheLookup::Miss | CacheLookup::Expired => Err(ServiceError::PriceUnavailable(canonical)),
        }
    }

    /// Cache-only batch read. Unsupported or missing pairs are simply
    /// omitted from the result rather than failing the whole batch.
    pub async fn get_cached_prices(&self, requested: &[String]) -> Vec<Price> {
        let mut out = Vec::with_capacity(requested.len());
        for pair in requested {
            let canonical = pair.to_uppercase();
            if !self.is_supported(&canonical) {
                continue;
            }
            if let Ok(CacheLookup::Hit(price)) = self.cache.get(&canonical).await {
                out.push(price);
            }
        }
        out
    }

    /// The only entry point allowed to call the exchange. Fetches every
    /// requested (or, if empty, every supported) pair through the
    /// fallback exchange and writes results into the cache, returning
    /// whatever came back.
    pub async fn refresh_prices(&self, ctx: &CancellationToken, pairs: &[String]) -> Result<Vec<Price>, ServiceError> {
        let targets: Vec<String> = if pairs.is_empty() {
            self.supported_pairs.clone()
        } else {
            let mut unsupported = Vec::new();
            let filtered: Vec<String> = pairs
                .iter()
                .map(|p| p.to_uppercase())
                .filter(|p| {
                    let ok = self.is_supported(p);
                    if !ok {
                        unsupported.push(p.clone());
                    }
                    ok
                })
                .collect();
            if !unsupported.is_empty() {
                tracing::warn!(?unsupported, "refresh requested for unsupported pairs, skipping them");
            }
            filtered
        };

        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let prices = self.exchange.get_tickers(ctx, &targets).await?;
        for price in &prices {
            if let Err(e) = self.cache.set(&price.pair, price.clone(), self.cache_ttl).await {
                tracing::warn!(pair = %price.pair, error = ?e, "failed to persist refreshed price");
            }
        }
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;

    fn supported() -> Vec<String> {
        vec!["BTC/USD".to_string(), "ETH/USD".to_string()]
    }

    #[tokio::test]
    async fn rejects_unsupported_pair_without_touching_cache() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let exchange = Arc::new(FallbackExchange::new(
            Arc::new(crate::exchange::StreamClient::new(&Default::default(), Arc::clone(&cache))),
            Arc::new(crate::exchange::RestClient::new(&Default::default())),
            Arc::clone(&cache),
            Duration::from_secs(30),
            Duration::from_secs(1),
            3,
        ));
        let service = PriceService::new(cache, exchange, Duration::from_secs(30), supported());

        let result = service.get_last_price("DOGE/USD").await;
        assert!(matches!(result, Err(ServiceError::InvalidPair(_))));
    }

    #[tokio::test]
    async fn cache_miss_surfaces_as_price_unavailable() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let exchange = Arc::new(FallbackExchange::new(
            Arc::new(crate::exchange::StreamClient::new(&Default::default(), Arc::clone(&cache))),
            Arc::new(crate::exchange::RestClient::new(&Default::default())),
            Arc::clone(&cache),
            Duration::from_secs(30),
            Duration::from_secs(1),
            3,
        ));
        let service = PriceService::new(cache, exchange, Duration::from_secs(30), supported());

        let result = service.get_last_price("BTC/USD").await;
        assert!(matches!(result, Err(ServiceError::PriceUnavailable(_))));
    }

    #[tokio::test]
    async fn cache_hit_returns_price_without_calling_exchange() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let price = Price::new("BTC/USD", 50000.0, chrono::Utc::now()).unwrap();
        cache.set("BTC/USD", price.clone(), Duration::from_secs(30)).await.unwrap();

        let exchange = Arc::new(FallbackExchange::new(
            Arc::new(crate::exchange::StreamClient::new(&Default::default(), Arc::clone(&cache))),
            Arc::new(crate::exchange::RestClient::new(&Default::default())),
            Arc::clone(&cache),
            Duration::from_secs(30),
            Duration::from_secs(1),
            3,
        ));
        let service = PriceService::new(cache, exchange, Duration::from_secs(30), supported());

        let result = service.get_last_price("btc/usd").await.unwrap();
        assert_eq!(result.amount, 50000.0);
    }

    #[tokio::test]
    async fn get_cached_prices_omits_unsupported_and_missing() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let price = Price::new("BTC/USD", 50000.0, chrono::Utc::now()).unwrap();
        cache.set("BTC/USD", price, Duration::from_secs(30)).await.unwrap();

        let exchange = Arc::new(FallbackExchange::new(
            Arc::new(crate::exchange::StreamClient::new(&Default::default(), Arc::clone(&cache))),
            Arc::new(crate::exchange::RestClient::new(&Default::default())),
            Arc::clone(&cache),
            Duration::from_secs(30),
            Duration::from_secs(1),
            3,
        ));
        let service = PriceService::new(cache, exchange, Duration::from_secs(30), supported());

        let result = service
            .get_cached_prices(&["BTC/USD".to_string(), "ETH/USD".to_string(), "DOGE/USD".to_string()])
            .await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].pair, "BTC/USD");
    }
}
