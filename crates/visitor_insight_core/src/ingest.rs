//! crates/visitor_insight_core/src/ingest.rs
//!
//! Server-side event ingestion. Events are appended once (keyed by their
//! client-generated id) and then folded into the visitor's counters. Critical
//! events are retried with backoff; routine events get a single retry and are
//! dropped after that.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::domain::{Event, EventData, Lead};
use crate::ports::{AppendOutcome, PortError, PortResult, VisitorActivity, VisitorStore};
use crate::session::SessionManager;

//=========================================================================================
// Retry Policy
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub const fn critical() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
        }
    }

    pub const fn routine() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(50),
        }
    }

    /// Backoff before the given retry (1-based), doubling each time.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

/// Runs `op` until it succeeds, a non-transient error occurs, or attempts run out.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> PortResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PortResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && e.is_transient() => {
                let backoff = policy.backoff(attempt);
                debug!(label, attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "Retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

//=========================================================================================
// Ingestor
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Inserted,
    /// The id was already stored; nothing changed.
    Duplicate,
    /// A routine event that could not be persisted and was let go.
    Dropped,
}

pub struct EventIngestor {
    store: Arc<dyn VisitorStore>,
    sessions: Arc<SessionManager>,
    critical_retry: RetryPolicy,
    routine_retry: RetryPolicy,
}

impl EventIngestor {
    pub fn new(store: Arc<dyn VisitorStore>, sessions: Arc<SessionManager>) -> Self {
        Self {
            store,
            sessions,
            critical_retry: RetryPolicy::critical(),
            routine_retry: RetryPolicy::routine(),
        }
    }

    pub fn with_retry_policies(mut self, critical: RetryPolicy, routine: RetryPolicy) -> Self {
        self.critical_retry = critical;
        self.routine_retry = routine;
        self
    }

    /// Records a new server-side event with a freshly generated id.
    pub async fn track(
        &self,
        visitor_id: Uuid,
        session_id: Option<Uuid>,
        payload: EventData,
        timestamp: DateTime<Utc>,
    ) -> PortResult<TrackOutcome> {
        self.ingest(Event::new(visitor_id, session_id, payload, timestamp))
            .await
    }

    /// Persists a client-identified event and updates the visitor projection.
    pub async fn ingest(&self, event: Event) -> PortResult<TrackOutcome> {
        let event_type = event.event_type();
        let critical = event_type.is_critical();
        let policy = if critical {
            self.critical_retry
        } else {
            self.routine_retry
        };

        let appended = with_retry(policy, event_type.as_str(), || {
            self.store.append_event(event.clone())
        })
        .await;

        match appended {
            Ok(AppendOutcome::Inserted) => {
                self.project(&event).await;
                Ok(TrackOutcome::Inserted)
            }
            Ok(AppendOutcome::Duplicate) => {
                debug!(event_id = %event.id, "Duplicate event delivery ignored");
                Ok(TrackOutcome::Duplicate)
            }
            Err(e) if critical => {
                error!(
                    event_id = %event.id,
                    visitor_id = %event.visitor_id,
                    event_type = event_type.as_str(),
                    error = %e,
                    "Critical event could not be persisted after retries; possible lead/revenue loss"
                );
                Err(e)
            }
            Err(e @ PortError::InvalidInput(_)) => Err(e),
            Err(e) => {
                warn!(event_id = %event.id, event_type = event_type.as_str(), error = %e, "Dropping routine event");
                Ok(TrackOutcome::Dropped)
            }
        }
    }

    /// Folds an inserted event into the visitor counters, session counters and leads.
    /// Failures here are logged; the event itself is already durable.
    async fn project(&self, event: &Event) {
        let mut activity = VisitorActivity {
            at: event.timestamp,
            ..Default::default()
        };
        let mut session_views = 0;
        let mut session_secs = 0;

        match &event.payload {
            EventData::PageView(page) => {
                activity.page = Some(page.path.clone());
                session_views = 1;
            }
            EventData::WindowOpen(w) => activity.window = Some(w.window.clone()),
            EventData::EmailCapture(capture) => {
                activity.email = Some(capture.email.clone());
                let mut lead = Lead::new(
                    &capture.email,
                    event.visitor_id,
                    capture.source.as_deref().unwrap_or("email_capture"),
                    event.timestamp,
                );
                lead.name = capture.name.clone();
                if let Some(visitor) = self.store.get_visitor(event.visitor_id).await.ok().flatten() {
                    lead.score = visitor.lead_score;
                }
                if let Err(e) = self.store.upsert_lead(lead).await {
                    error!(visitor_id = %event.visitor_id, error = %e, "Failed to upsert lead for captured email");
                }
            }
            EventData::CounselorModeEnabled(_) => activity.enabled_counselor_mode = true,
            EventData::Purchase(_) => activity.purchased_credits = true,
            EventData::SamChat(chat) => {
                activity.interacted_with_sam = true;
                activity.time_on_site_secs = chat.duration_secs;
            }
            EventData::Heartbeat(beat) => {
                activity.time_on_site_secs = beat.seconds_active;
                activity.window = beat.active_window.clone();
                session_secs = beat.seconds_active;
            }
            EventData::Custom(_) => {}
        }

        if let Err(e) = self
            .store
            .record_visitor_activity(event.visitor_id, activity)
            .await
        {
            warn!(visitor_id = %event.visitor_id, error = %e, "Failed to update visitor projection");
        }

        if let Some(session_id) = event.session_id {
            if session_views > 0 || session_secs > 0 {
                if let Err(e) = self
                    .sessions
                    .record_activity(session_id, session_views, session_secs)
                    .await
                {
                    debug!(session_id = %session_id, error = %e, "Session counters not updated");
                }
            }
        }
    }
}
