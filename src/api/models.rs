//! Request/response DTOs for the `/api/v1/ltp*` surface, shaped
//! directly off spec §6's literal response bodies (S1-S3).

use serde::Serialize;

use crate::errors::ServiceError;

#[derive(Debug, Serialize)]
pub struct LtpEntry {
    pub pair: String,
    pub amount: f64,
}

#[derive(Debug, Serialize)]
pub struct LtpError {
    pub pair: String,
    pub error: String,
    pub code: String,
    pub message: String,
}

impl LtpError {
    pub fn from_service_error(pair: &str, err: &ServiceError) -> Self {
        let (code, error) = error_code(err);
        Self { pair: pair.to_string(), error: error.to_string(), code: code.to_string(), message: err.to_string() }
    }
}

/// Body shared by `GET /api/v1/ltp`'s 200/206/503 responses. `errors`
/// is omitted (empty) on full success.
#[derive(Debug, Serialize, Default)]
pub struct LtpResponse {
    pub ltp: Vec<LtpEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<LtpError>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub refreshed: Vec<LtpEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CachedEntry {
    pub pair: String,
    pub amount: f64,
    pub age_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct CachedResponse {
    pub cached: Vec<CachedEntry>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// Maps the error taxonomy (spec §7) onto the stable string codes the
/// HTTP layer exposes. `InvalidPair` is the only one with its own
/// top-level status mapping (400); everything else surfaces inline as
/// a per-pair entry under `errors`.
fn error_code(err: &ServiceError) -> (&'static str, &'static str) {
    match err {
        ServiceError::InvalidPair(_) => ("INVALID_PARAMETER", "invalid_pair"),
        ServiceError::PriceUnavailable(_) => ("PRICE_UNAVAILABLE", "price_unavailable"),
        ServiceError::RetryableUpstream(_) => ("UPSTREAM_ERROR", "retryable_upstream"),
        ServiceError::TerminalUpstream(_) => ("UPSTREAM_ERROR", "terminal_upstream"),
        ServiceError::DecodeError(_) => ("UPSTREAM_ERROR", "decode_error"),
        ServiceError::StreamDisconnected => ("UPSTREAM_ERROR", "stream_disconnected"),
        ServiceError::ReconnectExhausted => ("UPSTREAM_ERROR", "reconnect_exhausted"),
        ServiceError::Cancelled => ("TIMEOUT", "cancelled"),
        ServiceError::CacheBackend(_) => ("CACHE_ERROR", "cache_backend"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pair_maps_to_invalid_parameter() {
        let err = ServiceError::InvalidPair("DOGE/USD".to_string());
        let entry = LtpError::from_service_error("DOGE/USD", &err);
        assert_eq!(entry.code, "INVALID_PARAMETER");
    }

    #[test]
    fn price_unavailable_maps_to_price_unavailable_code() {
        let err = ServiceError::PriceUnavailable("BTC/USD".to_string());
        let entry = LtpError::from_service_error("BTC/USD", &err);
        assert_eq!(entry.code, "PRICE_UNAVAILABLE");
    }
}
