//! HTTP handlers for the LTP surface (spec §6). Every handler is a
//! thin collaborator around [`PriceService`] — none of them touch the
//! exchange directly, and only `refresh` is allowed to trigger network
//! I/O.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use tokio_util::sync::CancellationToken;

use super::models::{ApiErrorBody, CachedEntry, CachedResponse, LtpEntry, LtpError, LtpResponse, RefreshResponse};
use crate::service::PriceService;

pub struct AppState {
    pub service: Arc<PriceService>,
}

pub type SharedState = Arc<AppState>;

/// `GET /health` — liveness. Always 200 while the process is up.
pub async fn health() -> &'static str {
    "OK"
}

/// `GET /ready` — readiness; 200 only when the cache backend answers.
pub async fn ready(State(state): State<SharedState>) -> impl IntoResponse {
    if state.service.is_ready().await {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "cache unreachable")
    }
}

fn parse_pairs_param(params: &HashMap<String, String>, key: &str) -> Vec<String> {
    params
        .get(key)
        .map(|csv| csv.split(',').map(|p| p.trim().to_uppercase()).filter(|p| !p.is_empty()).collect())
        .unwrap_or_default()
}

/// `GET /api/v1/ltp?pair=<csv>` — cache-only reads. Validates every
/// requested pair against the supported set before touching the
/// cache; an invalid pair anywhere in the request fails the whole
/// request with 400, matching spec §6's input-validation rule.
pub async fn get_ltp(State(state): State<SharedState>, Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let requested = parse_pairs_param(&params, "pair");
    let targets = if requested.is_empty() { state.service.supported_pairs().to_vec() } else { requested };

    for pair in &targets {
        if !state.service.is_supported(pair) {
            let body = ApiErrorBody { error: "INVALID_PARAMETER", message: format!("unsupported pair: {pair}") };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    }

    let mut hits = Vec::with_capacity(targets.len());
    let mut errors = Vec::new();
    for pair in &targets {
        match state.service.get_last_price(pair).await {
            Ok(price) => hits.push(LtpEntry { pair: price.pair, amount: price.amount }),
            Err(e) => errors.push(LtpError::from_service_error(pair, &e)),
        }
    }

    let status = if errors.is_empty() {
        StatusCode::OK
    } else if hits.is_empty() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::PARTIAL_CONTENT
    };

    (status, Json(LtpResponse { ltp: hits, errors })).into_response()
}

/// `POST /api/v1/ltp/refresh?pairs=<csv>` — triggers `refresh_prices`.
/// Always 200: partial or total upstream failure is reported in the
/// body, never as a non-2xx status, since the caller explicitly asked
/// for a best-effort refresh.
pub async fn refresh_ltp(State(state): State<SharedState>, Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let requested = parse_pairs_param(&params, "pairs");
    let targets = if requested.is_empty() { state.service.supported_pairs().to_vec() } else { requested };

    let ctx = CancellationToken::new();
    let body = match state.service.refresh_prices(&ctx, &targets).await {
        Ok(prices) => {
            let refreshed_pairs: Vec<&String> = prices.iter().map(|p| &p.pair).collect();
            let failed: Vec<String> =
                targets.iter().filter(|p| !refreshed_pairs.iter().any(|r| r.eq_ignore_ascii_case(p))).cloned().collect();
            let error = if failed.is_empty() { None } else { Some(format!("failed to refresh: {}", failed.join(", "))) };
            RefreshResponse {
                refreshed: prices.into_iter().map(|p| LtpEntry { pair: p.pair, amount: p.amount }).collect(),
                failed,
                error,
            }
        }
        Err(e) => RefreshResponse { refreshed: Vec::new(), failed: targets, error: Some(e.to_string()) },
    };

    (StatusCode::OK, Json(body))
}

/// `GET /api/v1/ltp/cached` — dumps whatever is currently cached for
/// the configured supported pairs; missing pairs are silently omitted.
pub async fn cached_ltp(State(state): State<SharedState>) -> impl IntoResponse {
    let pairs = state.service.supported_pairs().to_vec();
    let prices = state.service.get_cached_prices(&pairs).await;
    let cached = prices
        .into_iter()
        .map(|p| CachedEntry { pair: p.pair, amount: p.amount, age_seconds: p.age().num_milliseconds() as f64 / 1000.0 })
        .collect();
    Json(CachedResponse { cached })
}
