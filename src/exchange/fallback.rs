//! Fallback exchange (C5): prefers the streaming client, degrades to
//! the REST client on stream failure, and classifies the failure mode
//! so callers and metrics can tell timeouts apart from panics apart
//! from exhausted retries.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{RestClient, StreamClient};
use crate::cache::SharedCache;
use crate::errors::ServiceError;
use crate::models::Price;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    Timeout,
    ConnectionError,
    MaxRetries,
    Panic,
    ConnectionClosed,
    UnknownError,
    Unknown,
}

impl FallbackReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            FallbackReason::Timeout => "timeout",
            FallbackReason::ConnectionError => "connection_error",
            FallbackReason::MaxRetries => "max_retries",
            FallbackReason::Panic => "panic",
            FallbackReason::ConnectionClosed => "connection_closed",
            FallbackReason::UnknownError => "unknown_error",
            FallbackReason::Unknown => "unknown",
        }
    }

    fn classify(err: &ServiceError) -> Self {
        match err {
            ServiceError::Cancelled => FallbackReason::Timeout,
            ServiceError::StreamDisconnected => FallbackReason::ConnectionClosed,
            ServiceError::ReconnectExhausted => FallbackReason::MaxRetries,
            ServiceError::RetryableUpstream(_) => FallbackReason::ConnectionError,
            ServiceError::TerminalUpstream(_) => FallbackReason::UnknownError,
            ServiceError::DecodeError(_) => FallbackReason::UnknownError,
            _ => FallbackReason::Unknown,
        }
    }
}

/// Composite exchange client: every read tries the stream client
/// first, within `fallback_timeout`, and falls back to the REST client
/// on any failure (including the stream task panicking). Grounded on
/// the teacher's multi-exchange aggregation shape, generalized from
/// "query every exchange and combine" to "prefer one, degrade to the
/// other."
pub struct FallbackExchange {
    stream: Arc<StreamClient>,
    rest: Arc<RestClient>,
    cache: SharedCache,
    cache_ttl: Duration,
    fallback_timeout: Duration,
    max_retries: u32,
}

impl FallbackExchange {
    pub fn new(
        stream: Arc<StreamClient>,
        rest: Arc<RestClient>,
        cache: SharedCache,
        cache_ttl: Duration,
        fallback_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self { stream, rest, cache, cache_ttl, fallback_timeout, max_retries: max_retries.max(1) }
    }

    pub async fn get_ticker(&self, ctx: &CancellationToken, pair: &str) -> Result<Price, ServiceError> {
        match self.try_stream_with_retries(ctx, pair).await {
            Ok(price) => Ok(price),
            Err(reason) => {
                tracing::debug!(pair, reason = reason.as_label(), "stream ticker unavailable, falling back to REST");
                metrics::counter!("fallback_to_rest_total", "pair" => pair.to_string(), "reason" => reason.as_label())
                    .increment(1);
                self.rest.get_ticker(ctx, pair).await
            }
        }
    }

    pub async fn get_tickers(&self, ctx: &CancellationToken, pairs: &[String]) -> Result<Vec<Price>, ServiceError> {
        let mut out = Vec::with_capacity(pairs.len());
        let mut rest_needed = Vec::new();

        for pair in pairs {
            match self.try_stream_with_retries(ctx, pair).await {
                Ok(price) => out.push(price),
                Err(reason) => {
                    tracing::debug!(pair = %pair, reason = reason.as_label(), "stream ticker unavailable, queuing REST fallback");
                    metrics::counter!("fallback_to_rest_total", "pair" => pair.clone(), "reason" => reason.as_label())
                        .increment(1);
                    rest_needed.push(pair.clone());
                }
            }
        }

        if !rest_needed.is_empty() {
            match self.rest.get_tickers(ctx, &rest_needed).await {
                Ok(prices) => out.extend(prices),
                Err(e) => {
                    // A REST failure here must not wipe out prices already
                    // obtained from the stream: only propagate when nothing
                    // at all came back, i.e. the batch truly all-failed.
                    tracing::warn!(error = %e, pairs = ?rest_needed, "REST fallback failed for some pairs");
                    if out.is_empty() {
                        return Err(e);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Up to `max_retries` inner tries at the streaming path, each
    /// bounded by `fallback_timeout`, before the caller falls back to
    /// REST. A cancelled context aborts immediately rather than
    /// burning through the remaining tries.
    async fn try_stream_with_retries(&self, ctx: &CancellationToken, pair: &str) -> Result<Price, FallbackReason> {
        let mut last = FallbackReason::Unknown;
        for attempt in 1..=self.max_retries {
            if ctx.is_cancelled() {
                return Err(FallbackReason::Timeout);
            }
            match self.try_stream_ticker(ctx, pair).await {
                Ok(price) => return Ok(price),
                Err(reason) => {
                    tracing::trace!(pair, attempt, reason = reason.as_label(), "stream attempt failed");
                    last = reason;
                }
            }
        }
        Err(last)
    }

    /// Primes the stream subscription set and seeds the cache via REST
    /// so the first HTTP read after startup isn't a guaranteed miss
    /// (spec §2 Flow: "the bootstrap calls WarmupTickers (REST) to
    /// populate the cache").
    pub async fn warmup_tickers(&self, ctx: &CancellationToken, pairs: &[String]) -> Result<(), ServiceError> {
        self.stream.subscribe(pairs).await?;
        match self.rest.get_tickers(ctx, pairs).await {
            Ok(prices) => {
                for price in prices {
                    if let Err(e) = self.cache.set(&price.pair, price.clone(), self.cache_ttl).await {
                        tracing::warn!(pair = %price.pair, error = ?e, "failed to persist warmup price");
                    }
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "warmup REST fetch failed, continuing without a seeded cache");
                Ok(())
            }
        }
    }

    pub async fn close(&self) {
        self.stream.close().await;
    }

    /// Races the stream ticker against `fallback_timeout` and catches a
    /// panicked stream task via `JoinError::is_panic`, the idiomatic
    /// tokio-native way to treat "the inner future panicked" as just
    /// another classified failure rather than unwinding the caller.
    /// On timeout the spawned task is aborted rather than merely
    /// dropped — dropping a `JoinHandle` detaches the task instead of
    /// cancelling it, which would otherwise leak one task per timed-out
    /// attempt for the lifetime of its (possibly uncancelled) `ctx`.
    async fn try_stream_ticker(&self, ctx: &CancellationToken, pair: &str) -> Result<Price, FallbackReason> {
        let stream = Arc::clone(&self.stream);
        let ctx = ctx.clone();
        let pair = pair.to_string();

        let mut call = tokio::spawn(async move { stream.get_ticker(&ctx, &pair).await });

        match tokio::time::timeout(self.fallback_timeout, &mut call).await {
            Err(_elapsed) => {
                call.abort();
                Err(FallbackReason::Timeout)
            }
            Ok(Err(join_error)) if join_error.is_panic() => Err(FallbackReason::Panic),
            Ok(Err(_join_error)) => Err(FallbackReason::Unknown),
            Ok(Ok(Err(err))) => Err(FallbackReason::classify(&err)),
            Ok(Ok(Ok(price))) => Ok(price),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_cancelled_as_timeout() {
        assert_eq!(FallbackReason::classify(&ServiceError::Cancelled), FallbackReason::Timeout);
    }

    #[test]
    fn classifies_retryable_upstream_as_connection_error() {
        assert_eq!(
            FallbackReason::classify(&ServiceError::RetryableUpstream("boom".into())),
            FallbackReason::ConnectionError
        );
    }

    #[test]
    fn classifies_stream_disconnected_as_connection_closed() {
        assert_eq!(FallbackReason::classify(&ServiceError::StreamDisconnected), FallbackReason::ConnectionClosed);
    }

    #[test]
    fn labels_are_stable_metric_strings() {
        assert_eq!(FallbackReason::Timeout.as_label(), "timeout");
        assert_eq!(FallbackReason::MaxRetries.as_label(), "max_retries");
        assert_eq!(FallbackReason::Panic.as_label(), "panic");
    }
}
