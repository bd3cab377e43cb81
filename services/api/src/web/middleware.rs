//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error};
use visitor_insight_core::session::SessionValidation;

use crate::web::state::AppState;

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Compares SHA-256 digests of both tokens over every byte, so the time taken
/// depends on neither the token lengths nor the position of the first mismatch.
fn tokens_match(given: &str, expected: &str) -> bool {
    let given = Sha256::digest(given.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    given
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Middleware that validates the visitor's session token.
///
/// If valid, inserts the refreshed `Session` into request extensions for handlers to use.
/// If invalid, expired or missing, returns 401 Unauthorized.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let validation = state.sessions.validate(token, Utc::now()).await.map_err(|e| {
        error!("Failed to validate session: {:?}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    match validation {
        SessionValidation::Valid(session) => {
            req.extensions_mut().insert(session);
            Ok(next.run(req).await)
        }
        SessionValidation::Invalid(reason) => {
            debug!(?reason, "Rejected session token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Middleware that admits only requests bearing the configured admin token.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;
    if !tokens_match(token, &state.config.admin_token) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match("secret", "secret"));
        assert!(!tokens_match("secreT", "secret"));
        assert!(!tokens_match("secret-longer", "secret"));
        assert!(!tokens_match("", "secret"));
        assert!(tokens_match("", ""));
    }
}
