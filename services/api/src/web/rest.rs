//! services/api/src/web/rest.rs
//!
//! Contains the health endpoint and the master OpenAPI document.

use axum::Json;
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

use crate::web::protocol::{
    BatchResponse, BootstrapBody, BootstrapResponse, EventEnvelope, HealthResponse, IdentityView,
    LogoutBody, LogoutResponse, RescoreResponse, SessionView, TrackResponse,
};
use crate::web::{admin, events, identity};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        identity::bootstrap_handler,
        identity::validate_session_handler,
        identity::logout_handler,
        events::track_event_handler,
        events::track_batch_handler,
        admin::profile_handler,
        admin::report_handler,
        admin::leads_handler,
        admin::rescore_handler,
    ),
    components(
        schemas(
            HealthResponse,
            BootstrapBody,
            BootstrapResponse,
            IdentityView,
            SessionView,
            LogoutBody,
            LogoutResponse,
            EventEnvelope,
            TrackResponse,
            BatchResponse,
            RescoreResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Visitor Insight API", description = "Visitor identity, event tracking and lead scoring.")
    )
)]
pub struct ApiDoc;

/// Registers the two bearer schemes the protected routes refer to.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "session_token",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
        components.add_security_scheme(
            "admin_token",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness check.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Server is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
