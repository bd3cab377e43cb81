//! crates/visitor_insight_core/src/memory_store.rs
//!
//! An in-process implementation of the `VisitorStore` port. Used for local runs
//! (`STORE_BACKEND=memory`) and as the store behind every test in the workspace.
//! All state lives behind a single `RwLock`, so each trait method is atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{hash_map::Entry, HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    normalize_email, push_recent, Attribution, Event, Identity, Lead, Session, Visitor,
    PAGE_HISTORY_LIMIT,
};
use crate::ports::{
    AppendOutcome, EventQuery, PortError, PortResult, SignalMerge, VisitorActivity,
    VisitorQuery, VisitorStore,
};

#[derive(Default)]
struct Inner {
    identities: HashMap<Uuid, Identity>,
    sessions: HashMap<Uuid, Session>,
    session_tokens: HashMap<String, Uuid>,
    events: Vec<Event>,
    event_ids: HashSet<Uuid>,
    visitors: HashMap<Uuid, Visitor>,
    leads: HashMap<String, Lead>,
}

/// A `VisitorStore` backed by plain maps.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events, for diagnostics.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }
}

fn sorted_by_last_seen(mut identities: Vec<Identity>) -> Vec<Identity> {
    identities.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    identities
}

#[async_trait]
impl VisitorStore for MemoryStore {
    async fn find_identities_by_fingerprint(&self, fingerprint: &str) -> PortResult<Vec<Identity>> {
        let inner = self.inner.read().await;
        let found = inner
            .identities
            .values()
            .filter(|i| i.device_fingerprints.iter().any(|f| f == fingerprint))
            .cloned()
            .collect();
        Ok(sorted_by_last_seen(found))
    }

    async fn find_identities_by_email(&self, email: &str) -> PortResult<Vec<Identity>> {
        let email = normalize_email(email);
        let inner = self.inner.read().await;
        let found = inner
            .identities
            .values()
            .filter(|i| i.email.as_deref() == Some(email.as_str()))
            .cloned()
            .collect();
        Ok(sorted_by_last_seen(found))
    }

    async fn get_identity(&self, identity_id: Uuid) -> PortResult<Identity> {
        self.inner
            .read()
            .await
            .identities
            .get(&identity_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Identity {} not found", identity_id)))
    }

    async fn upsert_identity(&self, identity: Identity) -> PortResult<Identity> {
        self.inner
            .write()
            .await
            .identities
            .insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn merge_identity_signals(
        &self,
        identity_id: Uuid,
        merge: SignalMerge<'_>,
    ) -> PortResult<Identity> {
        let mut inner = self.inner.write().await;
        let identity = inner
            .identities
            .get_mut(&identity_id)
            .ok_or_else(|| PortError::NotFound(format!("Identity {} not found", identity_id)))?;

        push_recent(
            &mut identity.device_fingerprints,
            merge.fingerprint,
            merge.caps.max_fingerprints,
        );
        push_recent(&mut identity.known_ips, merge.ip, merge.caps.max_ips);
        if identity.email.is_none() {
            identity.email = merge.email.map(normalize_email);
        }
        identity.login_count = identity.login_count.saturating_add(1);
        identity.last_seen = identity.last_seen.max(merge.seen_at);
        Ok(identity.clone())
    }

    async fn insert_session(&self, session: Session) -> PortResult<()> {
        let mut inner = self.inner.write().await;
        if inner.session_tokens.contains_key(&session.session_token) {
            return Err(PortError::Conflict("session token already issued".to_string()));
        }
        inner
            .session_tokens
            .insert(session.session_token.clone(), session.id);
        inner.sessions.insert(session.id, session);
        Ok(())
    }

    async fn find_session_by_token(&self, token: &str) -> PortResult<Option<Session>> {
        let inner = self.inner.read().await;
        Ok(inner
            .session_tokens
            .get(token)
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    async fn touch_session(
        &self,
        session_id: Uuid,
        last_activity: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        session.last_activity = last_activity;
        session.expires_at = expires_at;
        Ok(())
    }

    async fn add_session_activity(
        &self,
        session_id: Uuid,
        page_views: u32,
        duration_secs: u64,
    ) -> PortResult<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        session.page_views = session.page_views.saturating_add(page_views);
        session.session_duration_secs = session.session_duration_secs.saturating_add(duration_secs);
        Ok(())
    }

    async fn deactivate_session(&self, session_id: Uuid) -> PortResult<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        session.is_active = false;
        Ok(())
    }

    async fn deactivate_sessions_for_identity(&self, identity_id: Uuid) -> PortResult<u64> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for session in inner
            .sessions
            .values_mut()
            .filter(|s| s.identity_id == identity_id && s.is_active)
        {
            session.is_active = false;
            count += 1;
        }
        Ok(count)
    }

    async fn append_event(&self, event: Event) -> PortResult<AppendOutcome> {
        let mut inner = self.inner.write().await;
        if !inner.event_ids.insert(event.id) {
            return Ok(AppendOutcome::Duplicate);
        }
        inner.events.push(event);
        Ok(AppendOutcome::Inserted)
    }

    async fn list_events(&self, query: &EventQuery) -> PortResult<Vec<Event>> {
        let inner = self.inner.read().await;
        let mut events: Vec<Event> = inner
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn get_visitor(&self, visitor_id: Uuid) -> PortResult<Option<Visitor>> {
        Ok(self.inner.read().await.visitors.get(&visitor_id).cloned())
    }

    async fn upsert_visitor(&self, visitor: Visitor) -> PortResult<()> {
        self.inner.write().await.visitors.insert(visitor.id, visitor);
        Ok(())
    }

    async fn insert_visitor_if_absent(&self, visitor: Visitor) -> PortResult<bool> {
        match self.inner.write().await.visitors.entry(visitor.id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(visitor);
                Ok(true)
            }
        }
    }

    async fn record_visitor_activity(
        &self,
        visitor_id: Uuid,
        activity: VisitorActivity,
    ) -> PortResult<()> {
        let mut inner = self.inner.write().await;
        let visitor = inner.visitors.entry(visitor_id).or_insert_with(|| {
            let attribution = Attribution {
                traffic_source: "direct".to_string(),
                traffic_medium: "none".to_string(),
                traffic_channel: "direct".to_string(),
                ..Default::default()
            };
            Visitor::new(visitor_id, attribution, activity.at)
        });

        if let Some(page) = &activity.page {
            visitor.page_views = visitor.page_views.saturating_add(1);
            visitor.pages_visited.push(page.clone());
            if visitor.pages_visited.len() > PAGE_HISTORY_LIMIT {
                let overflow = visitor.pages_visited.len() - PAGE_HISTORY_LIMIT;
                visitor.pages_visited.drain(..overflow);
            }
        }
        if let Some(window) = &activity.window {
            if !visitor.windows_opened.contains(window) {
                visitor.windows_opened.push(window.clone());
            }
        }
        visitor.total_time_on_site_secs = visitor
            .total_time_on_site_secs
            .saturating_add(activity.time_on_site_secs);
        visitor.interacted_with_sam |= activity.interacted_with_sam;
        visitor.enabled_counselor_mode |= activity.enabled_counselor_mode;
        visitor.purchased_credits |= activity.purchased_credits;
        if let Some(email) = &activity.email {
            visitor.email = Some(normalize_email(email));
        }
        if activity.purchased_credits {
            visitor.status = crate::domain::VisitorStatus::Converted;
        }
        visitor.last_seen = visitor.last_seen.max(activity.at);
        Ok(())
    }

    async fn set_lead_score(&self, visitor_id: Uuid, score: u8) -> PortResult<()> {
        let mut inner = self.inner.write().await;
        let visitor = inner
            .visitors
            .get_mut(&visitor_id)
            .ok_or_else(|| PortError::NotFound(format!("Visitor {} not found", visitor_id)))?;
        visitor.lead_score = score.min(100);
        Ok(())
    }

    async fn list_visitors(&self, query: VisitorQuery) -> PortResult<Vec<Visitor>> {
        let inner = self.inner.read().await;
        let mut visitors: Vec<Visitor> = inner
            .visitors
            .values()
            .filter(|v| query.matches(v))
            .cloned()
            .collect();
        visitors.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then(a.id.cmp(&b.id)));
        Ok(visitors)
    }

    async fn upsert_lead(&self, lead: Lead) -> PortResult<Lead> {
        let mut inner = self.inner.write().await;
        let email = normalize_email(&lead.email);
        let stored = match inner.leads.get_mut(&email) {
            Some(existing) => {
                existing.visitor_id = lead.visitor_id;
                existing.last_contact = existing.last_contact.max(lead.last_contact);
                existing.score = existing.score.max(lead.score);
                if existing.name.is_none() {
                    existing.name = lead.name;
                }
                if existing.phone.is_none() {
                    existing.phone = lead.phone;
                }
                existing.clone()
            }
            None => {
                let lead = Lead { email: email.clone(), ..lead };
                inner.leads.insert(email, lead.clone());
                lead
            }
        };
        Ok(stored)
    }

    async fn get_lead_by_email(&self, email: &str) -> PortResult<Option<Lead>> {
        Ok(self
            .inner
            .read()
            .await
            .leads
            .get(&normalize_email(email))
            .cloned())
    }

    async fn list_leads(&self) -> PortResult<Vec<Lead>> {
        let mut leads: Vec<Lead> = self.inner.read().await.leads.values().cloned().collect();
        leads.sort_by(|a, b| b.score.cmp(&a.score).then(a.email.cmp(&b.email)));
        Ok(leads)
    }
}
