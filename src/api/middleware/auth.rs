//! Bearer token authentication middleware.
//!
//! Validates `Authorization: Bearer <token>` headers against the single
//! configured API key. The key is stored only as a SHA-256 hash so a
//! leaked process dump doesn't hand over the plaintext credential.
//! A configured list of paths (health checks, metrics) bypass auth
//! entirely, matching the teacher's `TokenStore`/`validate_bearer_token`
//! shape but collapsed to one key instead of a named-token registry,
//! since the spec calls for a single shared credential rather than
//! per-client tokens.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};

#[derive(Clone)]
pub struct AuthState {
    expected_hash: Option<String>,
    unauth_paths: Vec<String>,
}

impl AuthState {
    /// `api_key = None` disables auth entirely (every request passes).
    pub fn new(api_key: Option<&str>, unauth_paths: Vec<String>) -> Self {
        Self { expected_hash: api_key.map(hash_token), unauth_paths }
    }

    fn is_unauthenticated_path(&self, path: &str) -> bool {
        self.unauth_paths.iter().any(|p| p == path)
    }
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, Response> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "missing Authorization header").into_response())?
        .to_str()
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid Authorization header encoding").into_response())?;

    if !raw.to_lowercase().starts_with("bearer ") {
        return Err((StatusCode::UNAUTHORIZED, "Authorization header must use the Bearer scheme").into_response());
    }

    let token = raw[7..].trim().to_string();
    if token.is_empty() {
        return Err((StatusCode::UNAUTHORIZED, "empty bearer token").into_response());
    }
    Ok(token)
}

/// Axum middleware: skips validation for configured unauthenticated
/// paths, otherwise requires a bearer token whose SHA-256 hash matches
/// the configured key.
pub async fn require_bearer_token(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let Some(expected_hash) = &state.expected_hash else {
        return Ok(next.run(request).await);
    };

    if state.is_unauthenticated_path(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let token = extract_bearer_token(request.headers())?;
    if &hash_token(&token) != expected_hash {
        return Err((StatusCode::UNAUTHORIZED, "invalid bearer token").into_response());
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_token_hashes_equal() {
        let state = AuthState::new(Some("secret123"), vec![]);
        assert_eq!(state.expected_hash, Some(hash_token("secret123")));
        assert_ne!(state.expected_hash, Some(hash_token("wrong")));
    }

    #[test]
    fn unauth_paths_bypass_regardless_of_key() {
        let state = AuthState::new(Some("secret123"), vec!["/health".to_string()]);
        assert!(state.is_unauthenticated_path("/health"));
        assert!(!state.is_unauthenticated_path("/api/v1/ltp"));
    }

    #[test]
    fn disabled_auth_has_no_expected_hash() {
        let state = AuthState::new(None, vec![]);
        assert!(state.expected_hash.is_none());
    }

    #[test]
    fn extract_bearer_token_requires_header() {
        let headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn extract_bearer_token_rejects_non_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Basic abcdef".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn extract_bearer_token_accepts_case_insensitive_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "bearer mytoken".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap(), "mytoken");
    }
}
