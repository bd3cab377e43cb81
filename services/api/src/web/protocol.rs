//! services/api/src/web/protocol.rs
//!
//! Defines the JSON request and response bodies exchanged between the browser
//! tracker, the admin dashboard and the API server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use visitor_insight_core::domain::{Attribution, DeviceInfo, Event, EventData, EventType, Identity, Session};
use visitor_insight_core::ingest::TrackOutcome;
use visitor_insight_core::ports::PortResult;

//=========================================================================================
// Identity and Sessions
//=========================================================================================

/// Sent by the browser on page load, after the device signature is computed.
#[derive(Deserialize, ToSchema)]
pub struct BootstrapBody {
    pub fingerprint: String,
    /// Structured device description. Derived from the `User-Agent` header when absent.
    #[schema(value_type = Option<Object>)]
    pub device_info: Option<DeviceInfo>,
    pub email: Option<String>,
    /// Referrer and UTM parameters of the landing page.
    #[schema(value_type = Option<Object>)]
    pub attribution: Option<Attribution>,
}

#[derive(Serialize, ToSchema)]
pub struct IdentityView {
    pub id: Uuid,
    pub email: Option<String>,
    pub role: String,
    pub login_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl From<&Identity> for IdentityView {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            role: identity.role.as_str().to_string(),
            login_count: identity.login_count,
            created_at: identity.created_at,
            last_seen: identity.last_seen,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SessionView {
    pub id: Uuid,
    pub identity_id: Uuid,
    /// Only present when the session is first issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub page_views: u32,
    pub session_duration_secs: u64,
}

impl SessionView {
    pub fn issued(session: &Session) -> Self {
        Self {
            session_token: Some(session.session_token.clone()),
            ..Self::from(session)
        }
    }
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            identity_id: session.identity_id,
            session_token: None,
            created_at: session.created_at,
            last_activity: session.last_activity,
            expires_at: session.expires_at,
            page_views: session.page_views,
            session_duration_secs: session.session_duration_secs,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct BootstrapResponse {
    pub identity: IdentityView,
    pub session: SessionView,
    pub recognized: bool,
    pub matched_by: String,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct LogoutBody {
    /// Invalidate every active session of the identity, not just this one.
    #[serde(default)]
    pub everywhere: bool,
}

#[derive(Serialize, ToSchema)]
pub struct LogoutResponse {
    pub invalidated: u64,
}

//=========================================================================================
// Events
//=========================================================================================

/// One tracked event as sent by the client. The id is client-generated so a
/// retried delivery is stored once.
#[derive(Deserialize, ToSchema)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub visitor_id: Uuid,
    pub session_id: Option<Uuid>,
    #[serde(rename = "type")]
    #[schema(value_type = String, example = "page_view")]
    pub event_type: EventType,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: Value,
    /// Defaults to the time of receipt.
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventEnvelope {
    pub fn into_event(self, received_at: DateTime<Utc>) -> PortResult<Event> {
        Ok(Event {
            id: self.id,
            visitor_id: self.visitor_id,
            session_id: self.session_id,
            payload: EventData::parse(self.event_type, self.data)?,
            timestamp: self.timestamp.unwrap_or(received_at),
        })
    }
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct TrackResponse {
    pub id: Uuid,
    /// One of `inserted`, `duplicate`, `dropped`, `rejected`.
    pub status: String,
}

impl TrackResponse {
    pub fn new(id: Uuid, outcome: TrackOutcome) -> Self {
        let status = match outcome {
            TrackOutcome::Inserted => "inserted",
            TrackOutcome::Duplicate => "duplicate",
            TrackOutcome::Dropped => "dropped",
        };
        Self {
            id,
            status: status.to_string(),
        }
    }

    pub fn rejected(id: Uuid) -> Self {
        Self {
            id,
            status: "rejected".to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct BatchResponse {
    pub inserted: usize,
    pub duplicate: usize,
    pub dropped: usize,
    pub rejected: usize,
    pub results: Vec<TrackResponse>,
}

impl BatchResponse {
    pub fn from_results(results: Vec<TrackResponse>) -> Self {
        let count = |status: &str| results.iter().filter(|r| r.status == status).count();
        Self {
            inserted: count("inserted"),
            duplicate: count("duplicate"),
            dropped: count("dropped"),
            rejected: count("rejected"),
            results,
        }
    }
}

//=========================================================================================
// Admin
//=========================================================================================

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportParams {
    /// Inclusive lower bound (RFC 3339).
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound (RFC 3339).
    pub to: Option<DateTime<Utc>>,
}

#[derive(Serialize, ToSchema)]
pub struct RescoreResponse {
    pub visitor_id: Uuid,
    pub previous_score: u8,
    pub lead_score: u8,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
