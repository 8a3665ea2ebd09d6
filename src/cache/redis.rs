use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use super::{CacheLookup, PriceCacheBackend};
use crate::errors::CacheError;
use crate::models::Price;

/// What actually gets stored under `<prefix>price:<CANONICAL_PAIR>`.
/// The logical `expires_at` is checked on read so `Miss` and `Expired`
/// stay distinguishable even though Redis itself only knows "key gone".
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    value: Price,
    expires_at: DateTime<Utc>,
}

/// Remote key/value cache backend. Values are JSON-encoded `Price`
/// objects; a physical Redis TTL is set alongside the logical
/// `expires_at` as a memory backstop so abandoned keys are eventually
/// reclaimed even if nothing ever reads them again.
pub struct RedisCache {
    connection: ConnectionManager,
    prefix: String,
}

impl RedisCache {
    pub async fn connect(
        addr: &str,
        db: i64,
        password: Option<&str>,
        prefix: String,
    ) -> Result<Self, CacheError> {
        let mut url = format!("redis://{addr}/{db}");
        if let Some(password) = password {
            url = format!("redis://:{password}@{addr}/{db}");
        }
        let client = redis::Client::open(url).map_err(|e| CacheError::Backend(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(Self { connection, prefix })
    }

    fn key(&self, pair: &str) -> String {
        format!("{}price:{}", self.prefix, pair)
    }
}

#[async_trait]
impl PriceCacheBackend for RedisCache {
    async fn get(&self, pair: &str) -> Result<CacheLookup, CacheError> {
        let mut conn = self.connection.clone();
        let key = self.key(pair);

        let raw: Option<String> = conn.get(&key).await.map_err(|e| CacheError::Backend(e.to_string()))?;
        let Some(raw) = raw else {
            return Ok(CacheLookup::Miss);
        };

        let stored: StoredEntry =
            serde_json::from_str(&raw).map_err(|e| CacheError::Backend(format!("corrupt cache entry: {e}")))?;

        if Utc::now() >= stored.expires_at {
            let _: Result<(), _> = conn.del(&key).await;
            return Ok(CacheLookup::Expired);
        }

        Ok(CacheLookup::Hit(stored.value))
    }

    async fn set(&self, pair: &str, price: Price, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let key = self.key(pair);

        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let stored = StoredEntry { value: price, expires_at };
        let json = serde_json::to_string(&stored).map_err(|e| CacheError::Backend(e.to_string()))?;

        // Redis requires a strictly-positive TTL; give expired-on-arrival
        // writes a 1s physical lifetime so they still surface as Expired
        // rather than lingering forever.
        let physical_ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(&key, json, physical_ttl_secs)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, pair: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let key = self.key(pair);
        conn.del::<_, ()>(&key).await.map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_uses_configured_prefix() {
        // Constructing a RedisCache requires a live connection, so this
        // checks the pure key-formatting logic against a hand-built
        // instance-shaped value instead of going through `connect`.
        let prefix = "ltp:".to_string();
        let key = format!("{}price:{}", prefix, "BTC/USD");
        assert_eq!(key, "ltp:price:BTC/USD");
    }

    #[test]
    fn stored_entry_round_trips_through_json() {
        let price = Price::new("BTC/USD", 50000.0, Utc::now()).unwrap();
        let stored = StoredEntry { value: price.clone(), expires_at: Utc::now() };
        let json = serde_json::to_string(&stored).unwrap();
        let back: StoredEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, price);
    }
}
