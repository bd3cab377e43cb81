//! services/api/src/web/admin.rs
//!
//! Admin endpoints: per-visitor engagement profiles, aggregate reports and
//! lead score write-back. All routes sit behind `require_admin`.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use visitor_insight_core::domain::Lead;
use visitor_insight_core::ports::{EventQuery, PortError, VisitorQuery};
use visitor_insight_core::report::{build_report, Report, ReportWindow};
use visitor_insight_core::scoring::EngagementProfile;

use crate::error::ApiError;
use crate::web::protocol::{ReportParams, RescoreResponse};
use crate::web::state::AppState;

//=========================================================================================
// Shared Operations
//=========================================================================================

/// Loads the visitors and events a window covers and aggregates them.
pub async fn load_report(state: &AppState, window: Option<ReportWindow>) -> Result<Report, ApiError> {
    let visitor_query = VisitorQuery {
        seen_from: window.and_then(|w| w.from),
        seen_to: window.and_then(|w| w.to),
    };
    let event_query = EventQuery {
        from: window.and_then(|w| w.from),
        to: window.and_then(|w| w.to),
        ..Default::default()
    };
    let visitors = state.store.list_visitors(visitor_query).await?;
    let events = state.store.list_events(&event_query).await?;
    Ok(build_report(
        &visitors,
        &events,
        window,
        Utc::now(),
        state.config.unit_price_cents,
    ))
}

/// Recomputes a visitor's lead score from their full history and stores it on
/// the visitor and, when there is one, on their lead.
pub async fn rescore_visitor(state: &AppState, visitor_id: Uuid) -> Result<RescoreResponse, ApiError> {
    let visitor = state
        .store
        .get_visitor(visitor_id)
        .await?
        .ok_or_else(|| PortError::NotFound(format!("Visitor {} not found", visitor_id)))?;
    let events = state.store.list_events(&EventQuery::for_visitor(visitor_id)).await?;

    let lead_score = state.scoring.lead_score(&visitor, &events);
    if lead_score != visitor.lead_score {
        state.store.set_lead_score(visitor_id, lead_score).await?;
    }
    if let Some(email) = visitor.email.as_deref() {
        if let Some(mut lead) = state.store.get_lead_by_email(email).await? {
            if lead.score != lead_score {
                lead.score = lead_score;
                state.store.upsert_lead(lead).await?;
            }
        }
    }

    Ok(RescoreResponse {
        visitor_id,
        previous_score: visitor.lead_score,
        lead_score,
    })
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Engagement profile of one visitor, scored now.
#[utoipa::path(
    get,
    path = "/admin/visitors/{id}/profile",
    params(("id" = Uuid, Path, description = "Visitor id")),
    responses(
        (status = 200, description = "Engagement profile", body = Object),
        (status = 401, description = "Missing or wrong admin token"),
        (status = 404, description = "Unknown visitor")
    ),
    security(("admin_token" = []))
)]
pub async fn profile_handler(
    State(state): State<Arc<AppState>>,
    Path(visitor_id): Path<Uuid>,
) -> Result<Json<EngagementProfile>, ApiError> {
    let visitor = state
        .store
        .get_visitor(visitor_id)
        .await?
        .ok_or_else(|| PortError::NotFound(format!("Visitor {} not found", visitor_id)))?;
    let events = state.store.list_events(&EventQuery::for_visitor(visitor_id)).await?;
    Ok(Json(state.scoring.score(&visitor, &events, Utc::now())))
}

/// Aggregate report over an optional time window.
#[utoipa::path(
    get,
    path = "/admin/report",
    params(ReportParams),
    responses(
        (status = 200, description = "Report, with a tally of skipped records", body = Object),
        (status = 401, description = "Missing or wrong admin token"),
        (status = 422, description = "`from` is after `to`")
    ),
    security(("admin_token" = []))
)]
pub async fn report_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReportParams>,
) -> Result<Json<Report>, ApiError> {
    if let (Some(from), Some(to)) = (params.from, params.to) {
        if from > to {
            return Err(ApiError::BadRequest("`from` must not be after `to`".to_string()));
        }
    }
    let window = (params.from.is_some() || params.to.is_some()).then_some(ReportWindow {
        from: params.from,
        to: params.to,
    });
    Ok(Json(load_report(&state, window).await?))
}

/// Every captured lead, highest score first.
#[utoipa::path(
    get,
    path = "/admin/leads",
    responses(
        (status = 200, description = "Leads sorted by score", body = [Object]),
        (status = 401, description = "Missing or wrong admin token")
    ),
    security(("admin_token" = []))
)]
pub async fn leads_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Lead>>, ApiError> {
    Ok(Json(state.store.list_leads().await?))
}

/// Recompute a visitor's lead score and write it back.
#[utoipa::path(
    post,
    path = "/admin/visitors/{id}/rescore",
    params(("id" = Uuid, Path, description = "Visitor id")),
    responses(
        (status = 200, description = "Score recomputed", body = RescoreResponse),
        (status = 401, description = "Missing or wrong admin token"),
        (status = 404, description = "Unknown visitor")
    ),
    security(("admin_token" = []))
)]
pub async fn rescore_handler(
    State(state): State<Arc<AppState>>,
    Path(visitor_id): Path<Uuid>,
) -> Result<Json<RescoreResponse>, ApiError> {
    let result = rescore_visitor(&state, visitor_id).await?;
    info!(
        visitor_id = %visitor_id,
        previous = result.previous_score,
        score = result.lead_score,
        "Visitor rescored"
    );
    Ok(Json(result))
}
