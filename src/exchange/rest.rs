use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::ExchangeConfig;
use crate::errors::{classify_reqwest_error, ServiceError};
use crate::models::Price;
use crate::pairs;

/// The documented Kraken `/Ticker` response shape: an error list plus a
/// map keyed by the REST symbol actually returned, which does not
/// always equal the symbol requested.
#[derive(Debug, Deserialize)]
struct TickerResponse {
    error: Vec<String>,
    result: HashMap<String, TickerData>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    /// Last trade closed array: `[price, lot volume]`.
    c: Vec<String>,
}

/// REST client (C3): single-shot ticker fetches with bounded retry,
/// exponential backoff, and retryable/terminal error classification.
/// Grounded on the teacher's `Binance::fetch_funding_rate` (reqwest GET
/// → typed JSON decode → map into a domain type), generalized with the
/// retry loop and batching the spec requires.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    max_retries: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl RestClient {
    pub fn new(config: &ExchangeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub async fn get_ticker(&self, ctx: &CancellationToken, pair: &str) -> Result<Price, ServiceError> {
        let prices = self.get_tickers(ctx, std::slice::from_ref(&pair.to_string())).await?;
        prices
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::PriceUnavailable(pair.to_string()))
    }

    /// Fetches many tickers in a single upstream request (comma-joined
    /// REST symbols).
    pub async fn get_tickers(&self, ctx: &CancellationToken, pairs: &[String]) -> Result<Vec<Price>, ServiceError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let rest_symbols: Vec<String> = pairs.iter().map(|p| pairs::to_rest(p)).collect::<Result<_, _>>()?;
        let url = format!("{}/Ticker?pair={}", self.base_url, rest_symbols.join(","));

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if ctx.is_cancelled() {
                return Err(ServiceError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancelled() => Err(ServiceError::Cancelled),
                result = self.attempt_once(&url) => result,
            };

            match outcome {
                Ok(body) => return Ok(Self::map_result(body, pairs, &rest_symbols)),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = std::cmp::min(self.base_backoff * attempt, self.max_backoff);
                    tracing::warn!(attempt, ?backoff, error = %e, "kraken REST call failed, retrying");
                    tokio::select! {
                        biased;
                        _ = ctx.cancelled() => return Err(ServiceError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_once(&self, url: &str) -> Result<TickerResponse, ServiceError> {
        let response = tokio::time::timeout(self.request_timeout, self.http.get(url).send())
            .await
            .map_err(|_| ServiceError::RetryableUpstream("request timed out".to_string()))?
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ServiceError::RetryableUpstream(format!("http {status}")));
        }
        if status.is_client_error() {
            return Err(ServiceError::TerminalUpstream(format!("http {status}")));
        }

        // A failure to even read/parse the body is treated as retryable
        // only because the body read itself failed — it's indistinguishable
        // from a truncated connection, per the spec's retry rule.
        let body: TickerResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::RetryableUpstream(format!("body read failed: {e}")))?;

        if !body.error.is_empty() {
            return Err(ServiceError::TerminalUpstream(body.error.join("; ")));
        }

        Ok(body)
    }

    /// Maps exchange-returned REST symbols back onto the requested
    /// canonical pairs. Per spec §4.3, a result key may differ from the
    /// requested symbol; match by exact equality or substring
    /// containment, discard unmatched results, and omit unmatched
    /// requests rather than erroring.
    fn map_result(body: TickerResponse, canonical_pairs: &[String], rest_symbols: &[String]) -> Vec<Price> {
        let mut out = Vec::with_capacity(canonical_pairs.len());
        for (canonical, rest_symbol) in canonical_pairs.iter().zip(rest_symbols.iter()) {
            let matched = body.result.iter().find(|(key, _)| {
                key.as_str() == rest_symbol.as_str()
                    || key.contains(rest_symbol.as_str())
                    || rest_symbol.contains(key.as_str())
            });
            let Some((_, ticker)) = matched else { continue };
            let Some(price_str) = ticker.c.first() else { continue };
            let Ok(amount) = price_str.parse::<f64>() else { continue };
            if let Ok(price) = Price::new(canonical, amount, chrono::Utc::now()) {
                out.push(price);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(price: &str) -> TickerData {
        TickerData { c: vec![price.to_string(), "1.0".to_string()] }
    }

    #[test]
    fn maps_exact_match() {
        let mut result = HashMap::new();
        result.insert("XXBTZUSD".to_string(), ticker("50000.0"));
        let body = TickerResponse { error: vec![], result };

        let prices = RestClient::map_result(body, &["BTC/USD".to_string()], &["XXBTZUSD".to_string()]);
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].pair, "BTC/USD");
        assert_eq!(prices[0].amount, 50000.0);
    }

    #[test]
    fn discards_unmatched_results_and_omits_unmatched_requests() {
        let mut result = HashMap::new();
        result.insert("XETHZUSD".to_string(), ticker("3000.0"));
        let body = TickerResponse { error: vec![], result };

        let prices = RestClient::map_result(
            body,
            &["BTC/USD".to_string(), "ETH/USD".to_string()],
            &["XXBTZUSD".to_string(), "XETHZUSD".to_string()],
        );
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].pair, "ETH/USD");
    }

    #[test]
    fn matches_by_substring_containment() {
        // Exchange returns a key that contains the requested symbol but
        // isn't an exact match (observed Kraken behavior for some pairs).
        let mut result = HashMap::new();
        result.insert("XXBTZUSD.d".to_string(), ticker("50000.0"));
        let body = TickerResponse { error: vec![], result };

        let prices = RestClient::map_result(body, &["BTC/USD".to_string()], &["XXBTZUSD".to_string()]);
        assert_eq!(prices.len(), 1);
    }

    #[test]
    fn skips_entries_with_unparseable_price() {
        let mut result = HashMap::new();
        result.insert("XXBTZUSD".to_string(), ticker("not-a-number"));
        let body = TickerResponse { error: vec![], result };

        let prices = RestClient::map_result(body, &["BTC/USD".to_string()], &["XXBTZUSD".to_string()]);
        assert!(prices.is_empty());
    }
}
