//! Price cache (C2): a typed, TTL-bearing cache in front of the read
//! path, backed by either an in-process map or a remote key/value
//! store, selected by configuration.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{CacheBackendKind, CacheConfig};
use crate::errors::CacheError;
use crate::models::Price;

/// Outcome of a cache read. Kept as a three-way enum rather than
/// `Option<Price>` because the read path and the watchdog care about
/// the difference between "never written" and "written, but expired".
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(Price),
    Miss,
    Expired,
}

impl CacheLookup {
    pub fn into_option(self) -> Option<Price> {
        match self {
            CacheLookup::Hit(p) => Some(p),
            CacheLookup::Miss | CacheLookup::Expired => None,
        }
    }
}

/// Backend-agnostic price cache contract. Both the in-process and
/// remote implementations surface `Miss` and `Expired` as distinct
/// outcomes and serialise writes per key.
#[async_trait]
pub trait PriceCacheBackend: Send + Sync {
    async fn get(&self, pair: &str) -> Result<CacheLookup, CacheError>;

    async fn set(&self, pair: &str, price: Price, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, pair: &str) -> Result<(), CacheError>;

    /// Batched read preserving input order in `hits`. The default
    /// implementation loops `get`; backends with a native multi-get may
    /// override it.
    async fn get_many(&self, pairs: &[String]) -> Result<(Vec<Price>, Vec<String>), CacheError> {
        let mut hits = Vec::with_capacity(pairs.len());
        let mut misses = Vec::new();
        for pair in pairs {
            match self.get(pair).await? {
                CacheLookup::Hit(price) => hits.push(price),
                CacheLookup::Miss | CacheLookup::Expired => misses.push(pair.clone()),
            }
        }
        Ok((hits, misses))
    }
}

pub type SharedCache = Arc<dyn PriceCacheBackend>;

/// Builds the configured cache backend. `key_prefix` is the
/// `business.cache_prefix` configuration value, namespacing keys when a
/// remote store is shared across deployments.
pub async fn build_cache(config: &CacheConfig, key_prefix: &str) -> Result<SharedCache, CacheError> {
    match config.backend {
        CacheBackendKind::Memory => Ok(Arc::new(memory::MemoryCache::new())),
        CacheBackendKind::RemoteKv => {
            let cache = redis::RedisCache::connect(
                &config.addr,
                config.db,
                config.password.as_deref(),
                key_prefix.to_string(),
            )
            .await?;
            Ok(Arc::new(cache))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_into_option() {
        let price = Price::new("BTC/USD", 1.0, chrono::Utc::now()).unwrap();
        assert!(CacheLookup::Hit(price).into_option().is_some());
        assert!(CacheLookup::Miss.into_option().is_none());
        assert!(CacheLookup::Expired.into_option().is_none());
    }
}
