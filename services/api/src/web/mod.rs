pub mod admin;
pub mod events;
pub mod identity;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use middleware::{require_admin, require_session};
pub use rest::ApiDoc;
pub use state::AppState;

/// Event batches stay well under this; anything larger is rejected before parsing.
const BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = match origin.parse::<HeaderValue>() {
        Ok(value) => AllowOrigin::exact(value),
        Err(e) => {
            warn!(origin, error = %e, "Ignoring unusable CORS origin");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT])
}

/// Builds the complete application router, Swagger UI included.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route("/identity/bootstrap", post(identity::bootstrap_handler))
        .route("/events", post(events::track_event_handler))
        .route("/events/batch", post(events::track_batch_handler));

    // Routes for the holder of a session token
    let session_routes = Router::new()
        .route("/sessions/validate", post(identity::validate_session_handler))
        .route("/sessions/logout", post(identity::logout_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    // Admin routes
    let admin_routes = Router::new()
        .route("/admin/report", get(admin::report_handler))
        .route("/admin/leads", get(admin::leads_handler))
        .route("/admin/visitors/{id}/profile", get(admin::profile_handler))
        .route("/admin/visitors/{id}/rescore", post(admin::rescore_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors_layer(&state.config.cors_origin))
        .with_state(state);

    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
