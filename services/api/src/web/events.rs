//! services/api/src/web/events.rs
//!
//! Event ingestion endpoints. Delivery is at-least-once: clients resend with the
//! same event id until they get a 2xx, and the store collapses duplicates.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;
use crate::web::protocol::{BatchResponse, EventEnvelope, TrackResponse};
use crate::web::state::AppState;

/// Largest batch accepted in one request.
pub const MAX_BATCH: usize = 500;

/// Track a single event.
#[utoipa::path(
    post,
    path = "/events",
    request_body = EventEnvelope,
    responses(
        (status = 202, description = "Event accepted", body = TrackResponse),
        (status = 422, description = "Unknown event type or payload that does not match it"),
        (status = 503, description = "Critical event could not be persisted; retry with the same id")
    )
)]
pub async fn track_event_handler(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<EventEnvelope>,
) -> Result<(StatusCode, Json<TrackResponse>), ApiError> {
    let id = envelope.id;
    let event = envelope.into_event(Utc::now())?;
    let outcome = state.ingestor.ingest(event).await?;
    Ok((StatusCode::ACCEPTED, Json(TrackResponse::new(id, outcome))))
}

/// Track a batch of events flushed by the client queue.
///
/// Events with a payload that does not match their type are rejected one by one.
/// A persistence failure fails the whole request so the client resends the
/// batch; events already stored come back as duplicates.
#[utoipa::path(
    post,
    path = "/events/batch",
    request_body = Vec<EventEnvelope>,
    responses(
        (status = 202, description = "Batch processed", body = BatchResponse),
        (status = 422, description = "Malformed batch or more than 500 events"),
        (status = 503, description = "Store unavailable; retry the batch")
    )
)]
pub async fn track_batch_handler(
    State(state): State<Arc<AppState>>,
    Json(envelopes): Json<Vec<EventEnvelope>>,
) -> Result<(StatusCode, Json<BatchResponse>), ApiError> {
    if envelopes.len() > MAX_BATCH {
        return Err(ApiError::BadRequest(format!(
            "batch of {} events exceeds the limit of {}",
            envelopes.len(),
            MAX_BATCH
        )));
    }

    let received_at = Utc::now();
    let mut results = Vec::with_capacity(envelopes.len());
    for envelope in envelopes {
        let id = envelope.id;
        match envelope.into_event(received_at) {
            Ok(event) => {
                let outcome = state.ingestor.ingest(event).await?;
                results.push(TrackResponse::new(id, outcome));
            }
            Err(e) => {
                warn!(event_id = %id, error = %e, "Rejected event in batch");
                results.push(TrackResponse::rejected(id));
            }
        }
    }
    Ok((StatusCode::ACCEPTED, Json(BatchResponse::from_results(results))))
}
