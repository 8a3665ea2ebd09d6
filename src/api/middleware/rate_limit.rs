//! Token-bucket limiter (C8): per-process admission control at the
//! HTTP edge. Grounded on the pack's `mcp-binance-rs`
//! `http/middleware/rate_limit.rs` (`governor::RateLimiter` wrapped in
//! a cloneable struct, axum `middleware::from_fn_with_state` returning
//! `429 TOO_MANY_REQUESTS`), generalized to take its quota from the
//! configured `capacity`/`refill_rate` rather than a single env var.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};

use crate::config::RateLimitConfig;

#[derive(Clone)]
pub struct RateLimiter {
    inner: Option<Arc<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
}

impl RateLimiter {
    /// `capacity` is the bucket size, `refill_rate` the number of
    /// tokens restored per minute. A disabled limiter always admits.
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self { inner: None };
        }
        let capacity = NonZeroU32::new(config.capacity).expect("rate_limit.capacity must be > 0");
        let refill_rate = NonZeroU32::new(config.refill_rate).expect("rate_limit.refill_rate must be > 0");
        let quota = Quota::per_minute(refill_rate).allow_burst(capacity);
        Self { inner: Some(Arc::new(GovernorRateLimiter::direct(quota))) }
    }

    pub fn check(&self) -> bool {
        match &self.inner {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }
}

pub async fn throttle(State(limiter): State<RateLimiter>, request: Request, next: Next) -> Result<Response, StatusCode> {
    if !limiter.check() {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_limiter_always_admits() {
        let config = RateLimitConfig { enabled: false, capacity: 1, refill_rate: 1 };
        let limiter = RateLimiter::new(&config);
        for _ in 0..10 {
            assert!(limiter.check());
        }
    }

    #[test]
    fn enabled_limiter_rejects_once_burst_exhausted() {
        let config = RateLimitConfig { enabled: true, capacity: 2, refill_rate: 1 };
        let limiter = RateLimiter::new(&config);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }
}
