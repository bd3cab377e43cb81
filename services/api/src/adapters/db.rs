//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `VisitorStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Queries are checked at runtime (`query` / `query_as`) so the crate builds
//! without a live database. Every read-modify-write the port promises to be
//! atomic is a single statement (`ON CONFLICT` upserts, array functions from the
//! migration).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;
use visitor_insight_core::domain::{
    normalize_email, Attribution, ConversationTurn, DeviceInfo, Event, EventData, EventType,
    Identity, Lead, LeadStatus, Role, Session, Visitor, VisitorStatus, PAGE_HISTORY_LIMIT,
};
use visitor_insight_core::ports::{
    AppendOutcome, EventQuery, PortError, PortResult, SignalMerge, VisitorActivity, VisitorQuery,
    VisitorStore,
};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `VisitorStore` port.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Maps driver errors onto the port taxonomy. Connection-level failures are
/// transient; a unique violation is a conflict.
fn db_err(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(e.to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::Unavailable(e.to_string())
        }
        sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23505") => {
            PortError::Conflict(db.message().to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_i32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn from_i64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn score_from_db(value: i16) -> u8 {
    value.clamp(0, i16::from(u8::MAX)) as u8
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const IDENTITY_COLUMNS: &str = "id, email, role, device_fingerprints, known_ips, login_count, \
     preferences, ui_state, viewed_articles, favorite_products, bookmarked_verses, created_at, last_seen";

#[derive(FromRow)]
struct IdentityRecord {
    id: Uuid,
    email: Option<String>,
    role: String,
    device_fingerprints: Vec<String>,
    known_ips: Vec<String>,
    login_count: i32,
    preferences: Json<BTreeMap<String, Value>>,
    ui_state: Json<BTreeMap<String, Value>>,
    viewed_articles: Vec<String>,
    favorite_products: Vec<String>,
    bookmarked_verses: Vec<String>,
    created_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}
impl IdentityRecord {
    fn to_domain(self) -> Identity {
        Identity {
            id: self.id,
            email: self.email,
            role: Role::parse(&self.role),
            device_fingerprints: self.device_fingerprints,
            known_ips: self.known_ips,
            login_count: from_i32(self.login_count),
            preferences: self.preferences.0,
            ui_state: self.ui_state.0,
            viewed_articles: self.viewed_articles,
            favorite_products: self.favorite_products,
            bookmarked_verses: self.bookmarked_verses,
            created_at: self.created_at,
            last_seen: self.last_seen,
        }
    }
}

const SESSION_COLUMNS: &str = "id, identity_id, session_token, device_fingerprint, device_info, \
     is_active, created_at, last_activity, expires_at, page_views, session_duration_secs";

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    identity_id: Uuid,
    session_token: String,
    device_fingerprint: String,
    device_info: Json<DeviceInfo>,
    is_active: bool,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    page_views: i32,
    session_duration_secs: i64,
}
impl SessionRecord {
    fn to_domain(self) -> Session {
        Session {
            id: self.id,
            identity_id: self.identity_id,
            session_token: self.session_token,
            device_fingerprint: self.device_fingerprint,
            device_info: self.device_info.0,
            is_active: self.is_active,
            created_at: self.created_at,
            last_activity: self.last_activity,
            expires_at: self.expires_at,
            page_views: from_i32(self.page_views),
            session_duration_secs: from_i64(self.session_duration_secs),
        }
    }
}

#[derive(FromRow)]
struct EventRecord {
    id: Uuid,
    visitor_id: Uuid,
    session_id: Option<Uuid>,
    event_type: String,
    data: Json<Value>,
    occurred_at: DateTime<Utc>,
}
impl EventRecord {
    fn to_domain(self) -> PortResult<Event> {
        let event_type = EventType::parse(&self.event_type)?;
        Ok(Event {
            id: self.id,
            visitor_id: self.visitor_id,
            session_id: self.session_id,
            payload: EventData::parse(event_type, self.data.0)?,
            timestamp: self.occurred_at,
        })
    }
}

const VISITOR_COLUMNS: &str = "id, email, page_views, total_time_on_site_secs, pages_visited, \
     windows_opened, interacted_with_sam, enabled_counselor_mode, purchased_credits, lead_score, \
     status, attribution, first_seen, last_seen";

#[derive(FromRow)]
struct VisitorRecord {
    id: Uuid,
    email: Option<String>,
    page_views: i32,
    total_time_on_site_secs: i64,
    pages_visited: Vec<String>,
    windows_opened: Vec<String>,
    interacted_with_sam: bool,
    enabled_counselor_mode: bool,
    purchased_credits: bool,
    lead_score: i16,
    status: String,
    attribution: Json<Attribution>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}
impl VisitorRecord {
    fn to_domain(self) -> Visitor {
        Visitor {
            id: self.id,
            email: self.email,
            page_views: from_i32(self.page_views),
            total_time_on_site_secs: from_i64(self.total_time_on_site_secs),
            pages_visited: self.pages_visited,
            windows_opened: self.windows_opened,
            interacted_with_sam: self.interacted_with_sam,
            enabled_counselor_mode: self.enabled_counselor_mode,
            purchased_credits: self.purchased_credits,
            lead_score: score_from_db(self.lead_score),
            status: VisitorStatus::parse(&self.status),
            attribution: self.attribution.0,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
        }
    }
}

const LEAD_COLUMNS: &str = "id, email, visitor_id, name, phone, source, score, status, \
     first_contact, last_contact, tags, notes, conversation_history";

#[derive(FromRow)]
struct LeadRecord {
    id: Uuid,
    email: String,
    visitor_id: Uuid,
    name: Option<String>,
    phone: Option<String>,
    source: String,
    score: i16,
    status: String,
    first_contact: DateTime<Utc>,
    last_contact: DateTime<Utc>,
    tags: Vec<String>,
    notes: Vec<String>,
    conversation_history: Json<Vec<ConversationTurn>>,
}
impl LeadRecord {
    fn to_domain(self) -> Lead {
        Lead {
            id: self.id,
            email: self.email,
            visitor_id: self.visitor_id,
            name: self.name,
            phone: self.phone,
            source: self.source,
            score: score_from_db(self.score),
            status: LeadStatus::parse(&self.status),
            first_contact: self.first_contact,
            last_contact: self.last_contact,
            tags: self.tags,
            notes: self.notes,
            conversation_history: self.conversation_history.0,
        }
    }
}

//=========================================================================================
// `VisitorStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl VisitorStore for PgStore {
    // --- Identities ---

    async fn find_identities_by_fingerprint(&self, fingerprint: &str) -> PortResult<Vec<Identity>> {
        let records = sqlx::query_as::<_, IdentityRecord>(&format!(
            "SELECT {} FROM identities WHERE device_fingerprints @> ARRAY[$1] ORDER BY last_seen DESC",
            IDENTITY_COLUMNS
        ))
        .bind(fingerprint)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn find_identities_by_email(&self, email: &str) -> PortResult<Vec<Identity>> {
        let records = sqlx::query_as::<_, IdentityRecord>(&format!(
            "SELECT {} FROM identities WHERE email = $1 ORDER BY last_seen DESC",
            IDENTITY_COLUMNS
        ))
        .bind(normalize_email(email))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_identity(&self, identity_id: Uuid) -> PortResult<Identity> {
        let record = sqlx::query_as::<_, IdentityRecord>(&format!(
            "SELECT {} FROM identities WHERE id = $1",
            IDENTITY_COLUMNS
        ))
        .bind(identity_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Identity {} not found", identity_id)),
            _ => db_err(e),
        })?;
        Ok(record.to_domain())
    }

    async fn upsert_identity(&self, identity: Identity) -> PortResult<Identity> {
        let record = sqlx::query_as::<_, IdentityRecord>(&format!(
            "INSERT INTO identities ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO UPDATE SET \
                email = EXCLUDED.email, role = EXCLUDED.role, \
                device_fingerprints = EXCLUDED.device_fingerprints, known_ips = EXCLUDED.known_ips, \
                login_count = EXCLUDED.login_count, preferences = EXCLUDED.preferences, \
                ui_state = EXCLUDED.ui_state, viewed_articles = EXCLUDED.viewed_articles, \
                favorite_products = EXCLUDED.favorite_products, \
                bookmarked_verses = EXCLUDED.bookmarked_verses, \
                last_seen = GREATEST(identities.last_seen, EXCLUDED.last_seen) \
             RETURNING {cols}",
            cols = IDENTITY_COLUMNS
        ))
        .bind(identity.id)
        .bind(identity.email.as_deref().map(normalize_email))
        .bind(identity.role.as_str())
        .bind(&identity.device_fingerprints)
        .bind(&identity.known_ips)
        .bind(to_i32(identity.login_count))
        .bind(Json(&identity.preferences))
        .bind(Json(&identity.ui_state))
        .bind(&identity.viewed_articles)
        .bind(&identity.favorite_products)
        .bind(&identity.bookmarked_verses)
        .bind(identity.created_at)
        .bind(identity.last_seen)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.to_domain())
    }

    async fn merge_identity_signals(
        &self,
        identity_id: Uuid,
        merge: SignalMerge<'_>,
    ) -> PortResult<Identity> {
        let record = sqlx::query_as::<_, IdentityRecord>(&format!(
            "UPDATE identities SET \
                device_fingerprints = push_recent(device_fingerprints, $2, $3), \
                known_ips = push_recent(known_ips, $4, $5), \
                email = COALESCE(email, $6), \
                login_count = login_count + 1, \
                last_seen = GREATEST(last_seen, $7) \
             WHERE id = $1 RETURNING {}",
            IDENTITY_COLUMNS
        ))
        .bind(identity_id)
        .bind(merge.fingerprint)
        .bind(i32::try_from(merge.caps.max_fingerprints).unwrap_or(i32::MAX))
        .bind(merge.ip)
        .bind(i32::try_from(merge.caps.max_ips).unwrap_or(i32::MAX))
        .bind(merge.email.map(normalize_email))
        .bind(merge.seen_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Identity {} not found", identity_id)),
            _ => db_err(e),
        })?;
        Ok(record.to_domain())
    }

    // --- Sessions ---

    async fn insert_session(&self, session: Session) -> PortResult<()> {
        sqlx::query(&format!(
            "INSERT INTO sessions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            SESSION_COLUMNS
        ))
        .bind(session.id)
        .bind(session.identity_id)
        .bind(&session.session_token)
        .bind(&session.device_fingerprint)
        .bind(Json(&session.device_info))
        .bind(session.is_active)
        .bind(session.created_at)
        .bind(session.last_activity)
        .bind(session.expires_at)
        .bind(to_i32(session.page_views))
        .bind(to_i64(session.session_duration_secs))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_session_by_token(&self, token: &str) -> PortResult<Option<Session>> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions WHERE session_token = $1",
            SESSION_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn touch_session(
        &self,
        session_id: Uuid,
        last_activity: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET last_activity = $2, expires_at = $3 WHERE id = $1",
        )
        .bind(session_id)
        .bind(last_activity)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Session {} not found", session_id)));
        }
        Ok(())
    }

    async fn add_session_activity(
        &self,
        session_id: Uuid,
        page_views: u32,
        duration_secs: u64,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET page_views = page_views + $2, \
             session_duration_secs = session_duration_secs + $3 WHERE id = $1",
        )
        .bind(session_id)
        .bind(to_i32(page_views))
        .bind(to_i64(duration_secs))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Session {} not found", session_id)));
        }
        Ok(())
    }

    async fn deactivate_session(&self, session_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("UPDATE sessions SET is_active = FALSE WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Session {} not found", session_id)));
        }
        Ok(())
    }

    async fn deactivate_sessions_for_identity(&self, identity_id: Uuid) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = FALSE WHERE identity_id = $1 AND is_active",
        )
        .bind(identity_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    // --- Events ---

    async fn append_event(&self, event: Event) -> PortResult<AppendOutcome> {
        let result = sqlx::query(
            "INSERT INTO events (id, visitor_id, session_id, event_type, data, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
        )
        .bind(event.id)
        .bind(event.visitor_id)
        .bind(event.session_id)
        .bind(event.event_type().as_str())
        .bind(Json(event.payload.body()))
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(if result.rows_affected() == 0 {
            AppendOutcome::Duplicate
        } else {
            AppendOutcome::Inserted
        })
    }

    async fn list_events(&self, query: &EventQuery) -> PortResult<Vec<Event>> {
        let types: Vec<&str> = query.types.iter().map(EventType::as_str).collect();
        let records = sqlx::query_as::<_, EventRecord>(
            "SELECT id, visitor_id, session_id, event_type, data, occurred_at FROM events \
             WHERE ($1::uuid IS NULL OR visitor_id = $1) \
               AND (cardinality($2::text[]) = 0 OR event_type = ANY($2)) \
               AND ($3::timestamptz IS NULL OR occurred_at >= $3) \
               AND ($4::timestamptz IS NULL OR occurred_at <= $4) \
             ORDER BY occurred_at, id",
        )
        .bind(query.visitor_id)
        .bind(&types)
        .bind(query.from)
        .bind(query.to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        // Rows written by older clients may no longer decode; they are left out.
        let mut events = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id;
            match record.to_domain() {
                Ok(event) => events.push(event),
                Err(e) => warn!(event_id = %id, error = %e, "Skipping undecodable event row"),
            }
        }
        Ok(events)
    }

    // --- Visitors ---

    async fn get_visitor(&self, visitor_id: Uuid) -> PortResult<Option<Visitor>> {
        let record = sqlx::query_as::<_, VisitorRecord>(&format!(
            "SELECT {} FROM visitors WHERE id = $1",
            VISITOR_COLUMNS
        ))
        .bind(visitor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn upsert_visitor(&self, visitor: Visitor) -> PortResult<()> {
        sqlx::query(&format!(
            "INSERT INTO visitors ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (id) DO UPDATE SET \
                email = EXCLUDED.email, page_views = EXCLUDED.page_views, \
                total_time_on_site_secs = EXCLUDED.total_time_on_site_secs, \
                pages_visited = EXCLUDED.pages_visited, windows_opened = EXCLUDED.windows_opened, \
                interacted_with_sam = EXCLUDED.interacted_with_sam, \
                enabled_counselor_mode = EXCLUDED.enabled_counselor_mode, \
                purchased_credits = EXCLUDED.purchased_credits, lead_score = EXCLUDED.lead_score, \
                status = EXCLUDED.status, attribution = EXCLUDED.attribution, \
                last_seen = GREATEST(visitors.last_seen, EXCLUDED.last_seen)",
            VISITOR_COLUMNS
        ))
        .bind(visitor.id)
        .bind(visitor.email.as_deref().map(normalize_email))
        .bind(to_i32(visitor.page_views))
        .bind(to_i64(visitor.total_time_on_site_secs))
        .bind(&visitor.pages_visited)
        .bind(&visitor.windows_opened)
        .bind(visitor.interacted_with_sam)
        .bind(visitor.enabled_counselor_mode)
        .bind(visitor.purchased_credits)
        .bind(i16::from(visitor.lead_score))
        .bind(visitor.status.as_str())
        .bind(Json(&visitor.attribution))
        .bind(visitor.first_seen)
        .bind(visitor.last_seen)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_visitor_if_absent(&self, visitor: Visitor) -> PortResult<bool> {
        let result = sqlx::query(&format!(
            "INSERT INTO visitors ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (id) DO NOTHING",
            VISITOR_COLUMNS
        ))
        .bind(visitor.id)
        .bind(visitor.email.as_deref().map(normalize_email))
        .bind(to_i32(visitor.page_views))
        .bind(to_i64(visitor.total_time_on_site_secs))
        .bind(&visitor.pages_visited)
        .bind(&visitor.windows_opened)
        .bind(visitor.interacted_with_sam)
        .bind(visitor.enabled_counselor_mode)
        .bind(visitor.purchased_credits)
        .bind(i16::from(visitor.lead_score))
        .bind(visitor.status.as_str())
        .bind(Json(&visitor.attribution))
        .bind(visitor.first_seen)
        .bind(visitor.last_seen)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_visitor_activity(
        &self,
        visitor_id: Uuid,
        activity: VisitorActivity,
    ) -> PortResult<()> {
        let pages: Vec<String> = activity.page.into_iter().collect();
        let windows: Vec<String> = activity.window.into_iter().collect();
        let status = if activity.purchased_credits {
            VisitorStatus::Converted
        } else {
            VisitorStatus::Active
        };
        let attribution = Attribution {
            traffic_source: "direct".to_string(),
            traffic_medium: "none".to_string(),
            traffic_channel: "direct".to_string(),
            ..Default::default()
        };

        sqlx::query(&format!(
            "INSERT INTO visitors ({}) \
             VALUES ($1, $2, cardinality($3::text[]), $4, $3, $5, $6, $7, $8, 0, $9, $10, $11, $11) \
             ON CONFLICT (id) DO UPDATE SET \
                email = COALESCE(EXCLUDED.email, visitors.email), \
                page_views = visitors.page_views + EXCLUDED.page_views, \
                total_time_on_site_secs = visitors.total_time_on_site_secs + EXCLUDED.total_time_on_site_secs, \
                pages_visited = keep_last(visitors.pages_visited || EXCLUDED.pages_visited, $12), \
                windows_opened = CASE \
                    WHEN EXCLUDED.windows_opened <@ visitors.windows_opened THEN visitors.windows_opened \
                    ELSE visitors.windows_opened || EXCLUDED.windows_opened END, \
                interacted_with_sam = visitors.interacted_with_sam OR EXCLUDED.interacted_with_sam, \
                enabled_counselor_mode = visitors.enabled_counselor_mode OR EXCLUDED.enabled_counselor_mode, \
                purchased_credits = visitors.purchased_credits OR EXCLUDED.purchased_credits, \
                status = CASE WHEN EXCLUDED.purchased_credits THEN 'converted' ELSE visitors.status END, \
                last_seen = GREATEST(visitors.last_seen, EXCLUDED.last_seen)",
            VISITOR_COLUMNS
        ))
        .bind(visitor_id)
        .bind(activity.email.as_deref().map(normalize_email))
        .bind(&pages)
        .bind(to_i64(activity.time_on_site_secs))
        .bind(&windows)
        .bind(activity.interacted_with_sam)
        .bind(activity.enabled_counselor_mode)
        .bind(activity.purchased_credits)
        .bind(status.as_str())
        .bind(Json(&attribution))
        .bind(activity.at)
        .bind(i32::try_from(PAGE_HISTORY_LIMIT).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_lead_score(&self, visitor_id: Uuid, score: u8) -> PortResult<()> {
        let result = sqlx::query("UPDATE visitors SET lead_score = $2 WHERE id = $1")
            .bind(visitor_id)
            .bind(i16::from(score.min(100)))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Visitor {} not found", visitor_id)));
        }
        Ok(())
    }

    async fn list_visitors(&self, query: VisitorQuery) -> PortResult<Vec<Visitor>> {
        let records = sqlx::query_as::<_, VisitorRecord>(&format!(
            "SELECT {} FROM visitors \
             WHERE ($1::timestamptz IS NULL OR last_seen >= $1) \
               AND ($2::timestamptz IS NULL OR last_seen <= $2) \
             ORDER BY first_seen, id",
            VISITOR_COLUMNS
        ))
        .bind(query.seen_from)
        .bind(query.seen_to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    // --- Leads ---

    async fn upsert_lead(&self, lead: Lead) -> PortResult<Lead> {
        let record = sqlx::query_as::<_, LeadRecord>(&format!(
            "INSERT INTO leads ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (email) DO UPDATE SET \
                visitor_id = EXCLUDED.visitor_id, \
                last_contact = GREATEST(leads.last_contact, EXCLUDED.last_contact), \
                score = GREATEST(leads.score, EXCLUDED.score), \
                name = COALESCE(leads.name, EXCLUDED.name), \
                phone = COALESCE(leads.phone, EXCLUDED.phone) \
             RETURNING {cols}",
            cols = LEAD_COLUMNS
        ))
        .bind(lead.id)
        .bind(normalize_email(&lead.email))
        .bind(lead.visitor_id)
        .bind(&lead.name)
        .bind(&lead.phone)
        .bind(&lead.source)
        .bind(i16::from(lead.score))
        .bind(lead.status.as_str())
        .bind(lead.first_contact)
        .bind(lead.last_contact)
        .bind(&lead.tags)
        .bind(&lead.notes)
        .bind(Json(&lead.conversation_history))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.to_domain())
    }

    async fn get_lead_by_email(&self, email: &str) -> PortResult<Option<Lead>> {
        let record = sqlx::query_as::<_, LeadRecord>(&format!(
            "SELECT {} FROM leads WHERE email = $1",
            LEAD_COLUMNS
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn list_leads(&self) -> PortResult<Vec<Lead>> {
        let records = sqlx::query_as::<_, LeadRecord>(&format!(
            "SELECT {} FROM leads ORDER BY score DESC, email",
            LEAD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossy_integer_conversions_saturate() {
        assert_eq!(to_i32(u32::MAX), i32::MAX);
        assert_eq!(to_i64(u64::MAX), i64::MAX);
        assert_eq!(from_i32(-5), 0);
        assert_eq!(from_i64(-1), 0);
        assert_eq!(score_from_db(-3), 0);
        assert_eq!(score_from_db(150), 150);
        assert_eq!(score_from_db(900), 255);
    }

    #[test]
    fn unknown_event_rows_fail_to_decode() {
        let record = EventRecord {
            id: Uuid::new_v4(),
            visitor_id: Uuid::new_v4(),
            session_id: None,
            event_type: "teleport".to_string(),
            data: Json(Value::Null),
            occurred_at: Utc::now(),
        };
        assert!(matches!(record.to_domain(), Err(PortError::InvalidInput(_))));
    }
}
