//! crates/visitor_insight_core/src/domain.rs
//!
//! Defines the core data structures for visitor identity, sessions, events and leads.
//! These structs are independent of any database; they derive `serde` traits because
//! they travel over the HTTP boundary as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::ports::{PortError, PortResult};

/// Most-recent paths kept in a visitor's `pages_visited`.
pub const PAGE_HISTORY_LIMIT: usize = 200;

//=========================================================================================
// Device Signals
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Mobile,
    Tablet,
    #[default]
    Desktop,
}

/// Structured, human-readable description of the browser and device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub os_version: String,
    pub device_type: DeviceType,
    pub screen_resolution: String,
    pub timezone: String,
    pub language: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            browser: "Unknown".to_string(),
            browser_version: String::new(),
            os: "Unknown".to_string(),
            os_version: String::new(),
            device_type: DeviceType::Desktop,
            screen_resolution: String::new(),
            timezone: String::new(),
            language: String::new(),
        }
    }
}

/// How much the hash of a [`DeviceSignature`] can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStrength {
    /// SHA-256 over the canonical signal string.
    Strong,
    /// 32-bit rolling hash; deterministic but not collision resistant.
    Weak,
}

/// A probabilistic device identity. Two equal hashes are a hint, never proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSignature {
    pub hash: String,
    pub strength: SignatureStrength,
    pub components: BTreeMap<String, String>,
    pub device_info: DeviceInfo,
}

//=========================================================================================
// Identity and Session
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Creator,
    Admin,
    #[default]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Creator => "creator",
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "creator" => Role::Creator,
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

/// A durable person record, recognized across sessions and devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: Option<String>,
    pub role: Role,
    /// Oldest first; the front is evicted on overflow.
    pub device_fingerprints: Vec<String>,
    pub known_ips: Vec<String>,
    pub login_count: u32,
    pub preferences: BTreeMap<String, Value>,
    pub ui_state: BTreeMap<String, Value>,
    pub viewed_articles: Vec<String>,
    pub favorite_products: Vec<String>,
    pub bookmarked_verses: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Identity {
    /// A brand-new identity seeded with the signals it was first seen with.
    pub fn new(fingerprint: &str, ip: &str, email: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.map(normalize_email),
            role: Role::User,
            device_fingerprints: vec![fingerprint.to_string()],
            known_ips: vec![ip.to_string()],
            login_count: 1,
            preferences: BTreeMap::new(),
            ui_state: BTreeMap::new(),
            viewed_articles: Vec::new(),
            favorite_products: Vec::new(),
            bookmarked_verses: Vec::new(),
            created_at: now,
            last_seen: now,
        }
    }
}

/// Moves `value` to the back of `list` (most recent), dropping the oldest past `cap`.
pub fn push_recent(list: &mut Vec<String>, value: &str, cap: usize) {
    list.retain(|existing| existing != value);
    list.push(value.to_string());
    if list.len() > cap {
        let overflow = list.len() - cap;
        list.drain(..overflow);
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// One browsing period bound to an identity and a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub session_token: String,
    pub device_fingerprint: String,
    pub device_info: DeviceInfo,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub page_views: u32,
    pub session_duration_secs: u64,
}

//=========================================================================================
// Visitor Analytics Record
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VisitorStatus {
    #[default]
    Active,
    Idle,
    Converted,
    Lost,
}

impl VisitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitorStatus::Active => "active",
            VisitorStatus::Idle => "idle",
            VisitorStatus::Converted => "converted",
            VisitorStatus::Lost => "lost",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "idle" => VisitorStatus::Idle,
            "converted" => VisitorStatus::Converted,
            "lost" => VisitorStatus::Lost,
            _ => VisitorStatus::Active,
        }
    }
}

/// Where a visitor came from, captured on first sight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Attribution {
    pub referrer: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    #[serde(default)]
    pub traffic_source: String,
    #[serde(default)]
    pub traffic_medium: String,
    #[serde(default)]
    pub traffic_channel: String,
    pub landing_page: Option<String>,
}

/// Behavioral counters kept alongside an [`Identity`] (same id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visitor {
    pub id: Uuid,
    pub email: Option<String>,
    pub page_views: u32,
    pub total_time_on_site_secs: u64,
    pub pages_visited: Vec<String>,
    pub windows_opened: Vec<String>,
    pub interacted_with_sam: bool,
    pub enabled_counselor_mode: bool,
    pub purchased_credits: bool,
    pub lead_score: u8,
    pub status: VisitorStatus,
    pub attribution: Attribution,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Visitor {
    pub fn new(id: Uuid, attribution: Attribution, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email: None,
            page_views: 0,
            total_time_on_site_secs: 0,
            pages_visited: Vec::new(),
            windows_opened: Vec::new(),
            interacted_with_sam: false,
            enabled_counselor_mode: false,
            purchased_credits: false,
            lead_score: 0,
            status: VisitorStatus::Active,
            attribution,
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn has_email(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.is_empty())
    }
}

//=========================================================================================
// Events
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    WindowOpen,
    EmailCapture,
    CounselorModeEnabled,
    Purchase,
    SamChat,
    Heartbeat,
    Custom,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::PageView,
        EventType::WindowOpen,
        EventType::EmailCapture,
        EventType::CounselorModeEnabled,
        EventType::Purchase,
        EventType::SamChat,
        EventType::Heartbeat,
        EventType::Custom,
    ];

    /// Events whose silent loss means a lost lead or lost revenue.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            EventType::EmailCapture | EventType::Purchase | EventType::CounselorModeEnabled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "page_view",
            EventType::WindowOpen => "window_open",
            EventType::EmailCapture => "email_capture",
            EventType::CounselorModeEnabled => "counselor_mode_enabled",
            EventType::Purchase => "purchase",
            EventType::SamChat => "sam_chat",
            EventType::Heartbeat => "heartbeat",
            EventType::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> PortResult<Self> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == value)
            .ok_or_else(|| PortError::InvalidInput(format!("unknown event type '{}'", value)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageViewData {
    pub path: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOpenData {
    pub window: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailCaptureData {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CounselorModeData {
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseData {
    pub product: String,
    pub amount_cents: u64,
    #[serde(default)]
    pub credits: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SamChatData {
    #[serde(default)]
    pub messages_sent: u32,
    #[serde(default)]
    pub duration_secs: u64,
}

/// Periodic activity snapshot; the time counters are deltas since the previous beat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HeartbeatData {
    pub active_window: Option<String>,
    pub seconds_active: u64,
    pub reading_secs: u64,
    pub listening_secs: u64,
    pub chat_secs: u64,
    pub highlights: u32,
    pub notes: u32,
    pub verses_read: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomData {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// Typed payload of an event. The variant determines the event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventData {
    PageView(PageViewData),
    WindowOpen(WindowOpenData),
    EmailCapture(EmailCaptureData),
    CounselorModeEnabled(CounselorModeData),
    Purchase(PurchaseData),
    SamChat(SamChatData),
    Heartbeat(HeartbeatData),
    Custom(CustomData),
}

impl EventData {
    pub fn event_type(&self) -> EventType {
        match self {
            EventData::PageView(_) => EventType::PageView,
            EventData::WindowOpen(_) => EventType::WindowOpen,
            EventData::EmailCapture(_) => EventType::EmailCapture,
            EventData::CounselorModeEnabled(_) => EventType::CounselorModeEnabled,
            EventData::Purchase(_) => EventType::Purchase,
            EventData::SamChat(_) => EventType::SamChat,
            EventData::Heartbeat(_) => EventType::Heartbeat,
            EventData::Custom(_) => EventType::Custom,
        }
    }

    /// Builds a typed payload from a wire type and an untyped JSON body.
    /// A missing or `null` body is read as an empty object.
    pub fn parse(event_type: EventType, data: Value) -> PortResult<Self> {
        let data = if data.is_null() {
            Value::Object(Default::default())
        } else {
            data
        };
        let tagged = serde_json::json!({ "type": event_type.as_str(), "data": data });
        serde_json::from_value(tagged).map_err(|e| {
            PortError::InvalidInput(format!(
                "invalid payload for {} event: {}",
                event_type.as_str(),
                e
            ))
        })
    }

    /// The untagged payload body, as stored next to the type column.
    pub fn body(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

/// An immutable behavioral fact. Never updated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Client-generated so that retried deliveries collapse onto one record.
    pub id: Uuid,
    pub visitor_id: Uuid,
    pub session_id: Option<Uuid>,
    pub payload: EventData,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        visitor_id: Uuid,
        session_id: Option<Uuid>,
        payload: EventData,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            visitor_id,
            session_id,
            payload,
            timestamp,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

//=========================================================================================
// Leads
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Converted,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Converted => "converted",
            LeadStatus::Lost => "lost",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "contacted" => LeadStatus::Contacted,
            "converted" => LeadStatus::Converted,
            "lost" => LeadStatus::Lost,
            _ => LeadStatus::New,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// A visitor promoted to a CRM contact once an email is known. One per email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub email: String,
    pub visitor_id: Uuid,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub source: String,
    pub score: u8,
    pub status: LeadStatus,
    pub first_contact: DateTime<Utc>,
    pub last_contact: DateTime<Utc>,
    pub tags: Vec<String>,
    pub notes: Vec<String>,
    pub conversation_history: Vec<ConversationTurn>,
}

impl Lead {
    pub fn new(email: &str, visitor_id: Uuid, source: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            visitor_id,
            name: None,
            phone: None,
            source: source.to_string(),
            score: 0,
            status: LeadStatus::New,
            first_contact: now,
            last_contact: now,
            tags: Vec::new(),
            notes: Vec::new(),
            conversation_history: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_recent_moves_duplicates_to_the_back_and_caps() {
        let mut list = vec!["a".to_string(), "b".to_string()];
        push_recent(&mut list, "a", 3);
        assert_eq!(list, vec!["b", "a"]);

        push_recent(&mut list, "c", 3);
        push_recent(&mut list, "d", 3);
        assert_eq!(list, vec!["a", "c", "d"]);
    }

    #[test]
    fn critical_event_types() {
        let critical: Vec<_> = EventType::ALL.iter().filter(|t| t.is_critical()).collect();
        assert_eq!(
            critical,
            vec![
                &EventType::EmailCapture,
                &EventType::CounselorModeEnabled,
                &EventType::Purchase
            ]
        );
    }

    #[test]
    fn parse_accepts_matching_payloads_and_null_bodies() {
        let data = EventData::parse(
            EventType::PageView,
            serde_json::json!({ "path": "/bible" }),
        )
        .unwrap();
        assert_eq!(data.event_type(), EventType::PageView);

        let data = EventData::parse(EventType::CounselorModeEnabled, Value::Null).unwrap();
        assert_eq!(data, EventData::CounselorModeEnabled(CounselorModeData::default()));
    }

    #[test]
    fn parse_rejects_mismatched_payloads_and_unknown_types() {
        let err = EventData::parse(EventType::Purchase, serde_json::json!({ "path": "/" }));
        assert!(matches!(err, Err(PortError::InvalidInput(_))));
        assert!(EventType::parse("teleport").is_err());
        assert_eq!(EventType::parse("sam_chat").unwrap(), EventType::SamChat);
    }

    #[test]
    fn body_strips_the_type_tag() {
        let data = EventData::WindowOpen(WindowOpenData {
            window: "bible".to_string(),
        });
        assert_eq!(data.body(), serde_json::json!({ "window": "bible" }));
        assert_eq!(EventData::parse(EventType::WindowOpen, data.body()).unwrap(), data);
    }
}
