//! crates/visitor_insight_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the engine's core logic.
//! These traits form the boundary of the hexagonal architecture: the resolver,
//! session manager, ingestion pipeline and reports only ever talk to a store
//! through `VisitorStore`, so a durable backend and an in-process map are
//! interchangeable at start-up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Event, EventType, Identity, Lead, Session, Visitor};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflicting write: {0}")]
    Conflict(String),
    /// A transient failure (connection reset, pool timeout). Worth retrying.
    #[error("Store temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

impl PortError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Unavailable(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Query and Command Types
//=========================================================================================

/// Bounds applied when merging a new signal into an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalCaps {
    pub max_fingerprints: usize,
    pub max_ips: usize,
}

impl Default for SignalCaps {
    fn default() -> Self {
        Self {
            max_fingerprints: 20,
            max_ips: 20,
        }
    }
}

/// The signals observed on one recognized return.
#[derive(Debug, Clone)]
pub struct SignalMerge<'a> {
    pub fingerprint: &'a str,
    pub ip: &'a str,
    /// Attached only when the identity has no email yet.
    pub email: Option<&'a str>,
    pub seen_at: DateTime<Utc>,
    pub caps: SignalCaps,
}

/// Whether an append created a record or collapsed onto an existing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    Duplicate,
}

/// Filter for event range queries. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub visitor_id: Option<Uuid>,
    pub types: Vec<EventType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl EventQuery {
    pub fn for_visitor(visitor_id: Uuid) -> Self {
        Self {
            visitor_id: Some(visitor_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.visitor_id.map_or(true, |id| event.visitor_id == id)
            && (self.types.is_empty() || self.types.contains(&event.event_type()))
            && self.from.map_or(true, |from| event.timestamp >= from)
            && self.to.map_or(true, |to| event.timestamp <= to)
    }
}

/// Filter for visitor listings, by `last_seen`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisitorQuery {
    pub seen_from: Option<DateTime<Utc>>,
    pub seen_to: Option<DateTime<Utc>>,
}

impl VisitorQuery {
    pub fn matches(&self, visitor: &Visitor) -> bool {
        self.seen_from.map_or(true, |from| visitor.last_seen >= from)
            && self.seen_to.map_or(true, |to| visitor.last_seen <= to)
    }
}

/// Counter changes derived from one event, applied atomically to a visitor row.
#[derive(Debug, Clone, Default)]
pub struct VisitorActivity {
    pub at: DateTime<Utc>,
    pub page: Option<String>,
    pub window: Option<String>,
    pub time_on_site_secs: u64,
    pub interacted_with_sam: bool,
    pub enabled_counselor_mode: bool,
    pub purchased_credits: bool,
    pub email: Option<String>,
}

//=========================================================================================
// Store Port
//=========================================================================================

#[async_trait]
pub trait VisitorStore: Send + Sync {
    // --- Identities ---
    async fn find_identities_by_fingerprint(&self, fingerprint: &str) -> PortResult<Vec<Identity>>;

    async fn find_identities_by_email(&self, email: &str) -> PortResult<Vec<Identity>>;

    async fn get_identity(&self, identity_id: Uuid) -> PortResult<Identity>;

    /// Upsert by id.
    async fn upsert_identity(&self, identity: Identity) -> PortResult<Identity>;

    /// Atomically folds new signals into an identity (set union with eviction of the
    /// oldest entries past the caps) and bumps `login_count` / `last_seen`.
    async fn merge_identity_signals(
        &self,
        identity_id: Uuid,
        merge: SignalMerge<'_>,
    ) -> PortResult<Identity>;

    // --- Sessions ---
    async fn insert_session(&self, session: Session) -> PortResult<()>;

    async fn find_session_by_token(&self, token: &str) -> PortResult<Option<Session>>;

    /// Last-write-wins activity refresh.
    async fn touch_session(
        &self,
        session_id: Uuid,
        last_activity: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn add_session_activity(
        &self,
        session_id: Uuid,
        page_views: u32,
        duration_secs: u64,
    ) -> PortResult<()>;

    async fn deactivate_session(&self, session_id: Uuid) -> PortResult<()>;

    async fn deactivate_sessions_for_identity(&self, identity_id: Uuid) -> PortResult<u64>;

    // --- Events ---
    /// Append-only insert keyed by the event id.
    async fn append_event(&self, event: Event) -> PortResult<AppendOutcome>;

    async fn list_events(&self, query: &EventQuery) -> PortResult<Vec<Event>>;

    // --- Visitors ---
    async fn get_visitor(&self, visitor_id: Uuid) -> PortResult<Option<Visitor>>;

    async fn upsert_visitor(&self, visitor: Visitor) -> PortResult<()>;

    /// Inserts the visitor unless a record with its id exists. Returns whether it
    /// inserted; an existing record is left untouched.
    async fn insert_visitor_if_absent(&self, visitor: Visitor) -> PortResult<bool>;

    /// Creates the visitor on first sight, otherwise applies the counter changes.
    async fn record_visitor_activity(
        &self,
        visitor_id: Uuid,
        activity: VisitorActivity,
    ) -> PortResult<()>;

    async fn set_lead_score(&self, visitor_id: Uuid, score: u8) -> PortResult<()>;

    async fn list_visitors(&self, query: VisitorQuery) -> PortResult<Vec<Visitor>>;

    // --- Leads ---
    /// Upsert by email. An existing lead keeps its id, first contact and CRM fields.
    async fn upsert_lead(&self, lead: Lead) -> PortResult<Lead>;

    async fn get_lead_by_email(&self, email: &str) -> PortResult<Option<Lead>>;

    async fn list_leads(&self) -> PortResult<Vec<Lead>>;
}

/// Transport used by the client-side batcher to ship events to the ingestion endpoint.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, events: &[Event]) -> PortResult<()>;
}
