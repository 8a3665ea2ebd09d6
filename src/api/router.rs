use axum::routing::{get, post};
use axum::Router;
use axum_prometheus::PrometheusMetricLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{self, SharedState};
use super::middleware::auth::{require_bearer_token, AuthState};
use super::middleware::rate_limit::{throttle, RateLimiter};
use crate::config::Config;

/// Builds and returns the full Axum router: every route shares
/// [`SharedState`], with rate-limit and auth applied ahead of all of
/// them (auth's own `unauth_paths` configuration is what exempts
/// `/health`, `/ready`, and `/metrics`), matching the teacher's
/// `router::build(state).with_state(...)` shape generalized from a
/// single scoring state to the full LTP state plus two middleware
/// layers composed with `tower::ServiceBuilder`.
pub fn build(state: SharedState, config: &Config) -> Router {
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let configured_key = config.auth.enabled.then(|| config.auth.api_key.as_deref()).flatten();
    let auth_state = AuthState::new(configured_key, config.auth.unauth_paths.clone());
    let rate_limiter = RateLimiter::new(&config.rate_limit);

    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(prometheus_layer)
        .layer(axum::middleware::from_fn_with_state(auth_state, require_bearer_token))
        .layer(axum::middleware::from_fn_with_state(rate_limiter, throttle));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(move || async move { metric_handle.render() }))
        .route("/api/v1/ltp", get(handlers::get_ltp))
        .route("/api/v1/ltp/refresh", post(handlers::refresh_ltp))
        .route("/api/v1/ltp/cached", get(handlers::cached_ltp))
        .with_state(state)
        .layer(middleware)
}
