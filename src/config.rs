//! Configuration (ambient, ties the whole crate together).
//!
//! Generalizes the teacher's flat `Config::from_env` (a struct
//! populated from `env::var`, with `dotenvy::dotenv()` loaded first)
//! into the sectioned shape the spec calls for. An optional YAML file
//! (path given by `LTP_CONFIG_FILE`) is read first and env vars under
//! the `LTP_` prefix are layered on top, so a deployment can ship a
//! base YAML file and override a handful of values per environment.

use std::env;
use std::fs;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000, shutdown_timeout: Duration::from_secs(10) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheBackendKind {
    Memory,
    RemoteKv,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub ttl: Duration,
    pub addr: String,
    pub db: i64,
    pub password: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            ttl: Duration::from_secs(30),
            addr: "127.0.0.1:6379".to_string(),
            db: 0,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub rest_url: String,
    pub websocket_url: String,
    pub timeout: Duration,
    pub request_timeout: Duration,
    pub fallback_timeout: Duration,
    pub max_retries: u32,
    pub price_cache_ttl: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://api.kraken.com/0/public".to_string(),
            websocket_url: "wss://ws.kraken.com".to_string(),
            timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            fallback_timeout: Duration::from_secs(3),
            max_retries: 3,
            price_cache_ttl: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub check_interval: Duration,
    pub max_age: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { check_interval: Duration::from_secs(20), max_age: Duration::from_secs(60) }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub capacity: u32,
    pub refill_rate: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { enabled: true, capacity: 100, refill_rate: 100 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub header_name: String,
    pub unauth_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            header_name: "Authorization".to_string(),
            unauth_paths: vec!["/health".to_string(), "/ready".to_string(), "/metrics".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusinessConfig {
    pub supported_pairs: Vec<String>,
    pub cache_prefix: String,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            supported_pairs: vec!["BTC/USD".to_string(), "ETH/USD".to_string()],
            cache_prefix: "ltp:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub exchange: ExchangeConfig,
    pub watchdog: WatchdogConfig,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
    pub business: BusinessConfig,
}

const ENV_PREFIX: &str = "LTP_";

impl Config {
    /// Loads configuration from an optional YAML file (`LTP_CONFIG_FILE`)
    /// layered under environment variable overrides, exactly the way the
    /// teacher's `from_env` treats `PAIRS`/`API_PORT` — a flat set of
    /// `env::var` reads with sensible defaults — just sectioned and with
    /// a file as the base layer.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let mut config = match env::var(format!("{ENV_PREFIX}CONFIG_FILE")) {
            Ok(path) => {
                let contents = fs::read_to_string(&path)
                    .unwrap_or_else(|e| panic!("failed to read config file {path}: {e}"));
                serde_yaml::from_str(&contents)
                    .unwrap_or_else(|e| panic!("failed to parse config file {path}: {e}"))
            }
            Err(_) => Config::default(),
        };

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_var("SERVER_PORT") {
            self.server.port = v.parse().expect("LTP_SERVER_PORT must be a valid port number");
        }
        if let Some(v) = env_var("SERVER_SHUTDOWN_TIMEOUT_SECS") {
            self.server.shutdown_timeout = Duration::from_secs(v.parse().expect("invalid shutdown timeout"));
        }

        if let Some(v) = env_var("CACHE_BACKEND") {
            self.cache.backend = match v.to_lowercase().as_str() {
                "memory" => CacheBackendKind::Memory,
                "remote-kv" | "remote_kv" | "redis" => CacheBackendKind::RemoteKv,
                other => panic!("unknown cache backend {other}"),
            };
        }
        if let Some(v) = env_var("CACHE_TTL_SECS") {
            self.cache.ttl = Duration::from_secs(v.parse().expect("invalid cache ttl"));
        }
        if let Some(v) = env_var("CACHE_ADDR") {
            self.cache.addr = v;
        }
        if let Some(v) = env_var("CACHE_DB") {
            self.cache.db = v.parse().expect("invalid cache db index");
        }
        if let Some(v) = env_var("CACHE_PASSWORD") {
            self.cache.password = Some(v);
        }

        if let Some(v) = env_var("EXCHANGE_REST_URL") {
            self.exchange.rest_url = v;
        }
        if let Some(v) = env_var("EXCHANGE_WEBSOCKET_URL") {
            self.exchange.websocket_url = v;
        }
        if let Some(v) = env_var("EXCHANGE_TIMEOUT_SECS") {
            self.exchange.timeout = Duration::from_secs(v.parse().expect("invalid exchange timeout"));
        }
        if let Some(v) = env_var("EXCHANGE_REQUEST_TIMEOUT_SECS") {
            self.exchange.request_timeout = Duration::from_secs(v.parse().expect("invalid request timeout"));
        }
        if let Some(v) = env_var("EXCHANGE_FALLBACK_TIMEOUT_SECS") {
            self.exchange.fallback_timeout = Duration::from_secs(v.parse().expect("invalid fallback timeout"));
        }
        if let Some(v) = env_var("EXCHANGE_MAX_RETRIES") {
            self.exchange.max_retries = v.parse().expect("invalid max retries");
        }
        if let Some(v) = env_var("EXCHANGE_PRICE_CACHE_TTL_SECS") {
            self.exchange.price_cache_ttl = Duration::from_secs(v.parse().expect("invalid price cache ttl"));
        }

        if let Some(v) = env_var("WATCHDOG_CHECK_INTERVAL_SECS") {
            self.watchdog.check_interval = Duration::from_secs(v.parse().expect("invalid watchdog check interval"));
        }
        if let Some(v) = env_var("WATCHDOG_MAX_AGE_SECS") {
            self.watchdog.max_age = Duration::from_secs(v.parse().expect("invalid watchdog max age"));
        }

        if let Some(v) = env_var("RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = parse_bool(&v);
        }
        if let Some(v) = env_var("RATE_LIMIT_CAPACITY") {
            self.rate_limit.capacity = v.parse().expect("invalid rate limit capacity");
        }
        if let Some(v) = env_var("RATE_LIMIT_REFILL_RATE") {
            self.rate_limit.refill_rate = v.parse().expect("invalid rate limit refill rate");
        }

        if let Some(v) = env_var("AUTH_ENABLED") {
            self.auth.enabled = parse_bool(&v);
        }
        if let Some(v) = env_var("AUTH_API_KEY") {
            self.auth.api_key = Some(v);
        }
        if let Some(v) = env_var("AUTH_HEADER_NAME") {
            self.auth.header_name = v;
        }
        if let Some(v) = env_var("AUTH_UNAUTH_PATHS") {
            self.auth.unauth_paths = split_csv(&v);
        }

        if let Some(v) = env_var("SUPPORTED_PAIRS") {
            self.business.supported_pairs = split_csv(&v).into_iter().map(|p| p.to_uppercase()).collect();
        }
        if let Some(v) = env_var("CACHE_PREFIX") {
            self.business.cache_prefix = v;
        }
    }
}

fn env_var(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}")).ok()
}

fn split_csv(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
        assert!(!config.business.supported_pairs.is_empty());
    }

    #[test]
    fn split_csv_trims_and_drops_empties() {
        assert_eq!(split_csv("BTC/USD, ETH/USD,,"), vec!["BTC/USD", "ETH/USD"]);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("YES"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }
}
