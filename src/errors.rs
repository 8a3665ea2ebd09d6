use thiserror::Error;

/// Error taxonomy for the price ingestion and serving path.
///
/// Retryability is a predicate on the variant (`is_retryable`), not on
/// string matching — the retry loop in the REST client consumes
/// `RetryableUpstream` internally and only ever lets it leak once the
/// retry budget is exhausted.
#[derive(Debug, Error, Clone)]
pub enum ServiceError {
    #[error("invalid pair: {0}")]
    InvalidPair(String),

    #[error("price unavailable for {0}")]
    PriceUnavailable(String),

    #[error("retryable upstream error: {0}")]
    RetryableUpstream(String),

    #[error("terminal upstream error: {0}")]
    TerminalUpstream(String),

    #[error("failed to decode upstream response: {0}")]
    DecodeError(String),

    #[error("stream disconnected")]
    StreamDisconnected,

    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,

    #[error("operation cancelled")]
    Cancelled,

    #[error("cache backend error: {0}")]
    CacheBackend(String),
}

impl ServiceError {
    /// Whether this error should be consumed by a retry loop rather than
    /// propagated to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::RetryableUpstream(_))
    }
}

/// Classifies a `reqwest` transport error into the taxonomy above.
/// Network I/O errors and timeouts are retryable; everything else
/// (e.g. a build/redirect error) is treated as terminal since retrying
/// it would not change the outcome.
pub fn classify_reqwest_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() || e.is_connect() {
        return ServiceError::RetryableUpstream(e.to_string());
    }
    if let Some(status) = e.status() {
        if status.is_server_error() || status.as_u16() == 429 {
            return ServiceError::RetryableUpstream(format!("http {status}"));
        }
        return ServiceError::TerminalUpstream(format!("http {status}"));
    }
    ServiceError::RetryableUpstream(e.to_string())
}

impl From<CacheError> for ServiceError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Backend(msg) => ServiceError::CacheBackend(msg),
        }
    }
}

/// Errors surfaced by a price cache backend. Kept distinct from
/// [`ServiceError`] because cache failures are an infrastructure concern,
/// not an upstream-exchange one — callers translate at the boundary.
#[derive(Debug, Error, Clone)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_retryable_upstream_is_retryable() {
        assert!(ServiceError::RetryableUpstream("x".into()).is_retryable());
        assert!(!ServiceError::TerminalUpstream("x".into()).is_retryable());
        assert!(!ServiceError::PriceUnavailable("BTC/USD".into()).is_retryable());
    }
}
