//! services/api/src/web/identity.rs
//!
//! Identity bootstrap and session endpoints used by the browser tracker.

use axum::{
    extract::{ConnectInfo, State},
    http::{header, Extensions, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use visitor_insight_core::bootstrap::BootstrapRequest;
use visitor_insight_core::domain::{DeviceInfo, Session};

use crate::error::ApiError;
use crate::web::protocol::{
    BootstrapBody, BootstrapResponse, IdentityView, LogoutBody, LogoutResponse, SessionView,
};
use crate::web::state::AppState;

/// The caller's address: first `X-Forwarded-For` hop, else the socket peer.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Resolve the visitor behind a device signature and issue a session.
#[utoipa::path(
    post,
    path = "/identity/bootstrap",
    request_body = BootstrapBody,
    responses(
        (status = 200, description = "Identity resolved and session issued", body = BootstrapResponse),
        (status = 422, description = "Missing or empty fingerprint"),
        (status = 503, description = "Store temporarily unavailable")
    )
)]
pub async fn bootstrap_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    extensions: Extensions,
    Json(body): Json<BootstrapBody>,
) -> Result<Json<BootstrapResponse>, ApiError> {
    let device_info = body.device_info.unwrap_or_else(|| {
        let ua = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let language = headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .unwrap_or_default();
        DeviceInfo::from_user_agent(ua, "", "", language)
    });

    let request = BootstrapRequest {
        fingerprint: body.fingerprint,
        ip: client_ip(&headers, &extensions),
        email: body.email,
        device_info,
        attribution: body.attribution.unwrap_or_default(),
    };
    let boot = state.bootstrap.bootstrap(request, Utc::now()).await?;

    Ok(Json(BootstrapResponse {
        identity: IdentityView::from(&boot.identity),
        session: SessionView::issued(&boot.session),
        recognized: boot.recognized,
        matched_by: boot.matched_by.as_str().to_string(),
    }))
}

/// Validate the bearer session token and refresh its expiry.
#[utoipa::path(
    post,
    path = "/sessions/validate",
    responses(
        (status = 200, description = "Session is valid", body = SessionView),
        (status = 401, description = "Unknown, revoked or expired token")
    ),
    security(("session_token" = []))
)]
pub async fn validate_session_handler(Extension(session): Extension<Session>) -> Json<SessionView> {
    Json(SessionView::from(&session))
}

/// Invalidate the bearer session, or every session of its identity.
#[utoipa::path(
    post,
    path = "/sessions/logout",
    request_body(content = LogoutBody, description = "Optional; defaults to this session only"),
    responses(
        (status = 200, description = "Sessions invalidated", body = LogoutResponse),
        (status = 401, description = "Unknown, revoked or expired token")
    ),
    security(("session_token" = []))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    body: Option<Json<LogoutBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let everywhere = body.map(|Json(b)| b.everywhere).unwrap_or(false);
    let invalidated = if everywhere {
        state
            .sessions
            .invalidate_all_for_identity(session.identity_id)
            .await?
    } else {
        state.sessions.invalidate(session.id).await?;
        1
    };
    info!(identity_id = %session.identity_id, invalidated, "Logout");
    Ok((StatusCode::OK, Json(LogoutResponse { invalidated })))
}
