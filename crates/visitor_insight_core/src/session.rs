//! crates/visitor_insight_core/src/session.rs
//!
//! Issues, validates and invalidates session tokens bound to an identity and a device.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{DeviceInfo, Session};
use crate::ports::{PortResult, VisitorStore};

/// Bytes of OS randomness behind each token (256 bits).
pub const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Sliding window refreshed on every validated request.
    pub ttl: Duration,
    /// Absolute lifetime from issuance; activity never extends past it.
    pub max_lifetime: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::days(30),
            max_lifetime: Duration::days(90),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    Unknown,
    Revoked,
    Expired,
}

/// Outcome of a token check. Invalid sessions are a value, not an error.
#[derive(Debug, Clone)]
pub enum SessionValidation {
    Valid(Session),
    Invalid(InvalidReason),
}

impl SessionValidation {
    pub fn into_session(self) -> Option<Session> {
        match self {
            SessionValidation::Valid(session) => Some(session),
            SessionValidation::Invalid(_) => None,
        }
    }
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct SessionManager {
    store: Arc<dyn VisitorStore>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(store: Arc<dyn VisitorStore>, settings: SessionSettings) -> Self {
        Self { store, settings }
    }

    fn expiry(&self, created_at: DateTime<Utc>, last_activity: DateTime<Utc>) -> DateTime<Utc> {
        (last_activity + self.settings.ttl).min(created_at + self.settings.max_lifetime)
    }

    pub async fn create_session(
        &self,
        identity_id: Uuid,
        device_fingerprint: &str,
        device_info: DeviceInfo,
        now: DateTime<Utc>,
    ) -> PortResult<Session> {
        let session = Session {
            id: Uuid::new_v4(),
            identity_id,
            session_token: generate_token(),
            device_fingerprint: device_fingerprint.to_string(),
            device_info,
            is_active: true,
            created_at: now,
            last_activity: now,
            expires_at: self.expiry(now, now),
            page_views: 0,
            session_duration_secs: 0,
        };
        self.store.insert_session(session.clone()).await?;
        info!(session_id = %session.id, identity_id = %identity_id, "Session created");
        Ok(session)
    }

    /// Checks a token, invalidating it on expiry and refreshing activity otherwise.
    pub async fn validate(&self, token: &str, now: DateTime<Utc>) -> PortResult<SessionValidation> {
        let Some(mut session) = self.store.find_session_by_token(token).await? else {
            return Ok(SessionValidation::Invalid(InvalidReason::Unknown));
        };
        if !session.is_active {
            return Ok(SessionValidation::Invalid(InvalidReason::Revoked));
        }
        if now > session.expires_at {
            self.store.deactivate_session(session.id).await?;
            debug!(session_id = %session.id, "Session expired");
            return Ok(SessionValidation::Invalid(InvalidReason::Expired));
        }

        let last_activity = now.max(session.last_activity);
        let expires_at = self.expiry(session.created_at, last_activity);
        self.store
            .touch_session(session.id, last_activity, expires_at)
            .await?;
        session.last_activity = last_activity;
        session.expires_at = expires_at;
        Ok(SessionValidation::Valid(session))
    }

    pub async fn invalidate(&self, session_id: Uuid) -> PortResult<()> {
        self.store.deactivate_session(session_id).await?;
        info!(session_id = %session_id, "Session invalidated");
        Ok(())
    }

    /// Logs an identity out on every device.
    pub async fn invalidate_all_for_identity(&self, identity_id: Uuid) -> PortResult<u64> {
        let count = self.store.deactivate_sessions_for_identity(identity_id).await?;
        info!(identity_id = %identity_id, count, "Sessions invalidated for identity");
        Ok(count)
    }

    pub async fn record_activity(
        &self,
        session_id: Uuid,
        page_views: u32,
        duration_secs: u64,
    ) -> PortResult<()> {
        self.store
            .add_session_activity(session_id, page_views, duration_secs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    fn manager() -> (Arc<MemoryStore>, SessionManager) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), SessionManager::new(store, SessionSettings::default()))
    }

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn fresh_session_validates_and_refreshes_activity() {
        let (_, manager) = manager();
        let now = Utc::now();
        let session = manager
            .create_session(Uuid::new_v4(), "F1", DeviceInfo::default(), now)
            .await
            .unwrap();
        assert_eq!(session.expires_at, now + Duration::days(30));

        let later = now + Duration::days(10);
        let validated = manager
            .validate(&session.session_token, later)
            .await
            .unwrap()
            .into_session()
            .unwrap();
        assert_eq!(validated.last_activity, later);
        assert_eq!(validated.expires_at, later + Duration::days(30));
    }

    #[tokio::test]
    async fn expired_session_is_invalidated() {
        let (store, manager) = manager();
        let now = Utc::now();
        let session = manager
            .create_session(Uuid::new_v4(), "F1", DeviceInfo::default(), now)
            .await
            .unwrap();

        let result = manager
            .validate(&session.session_token, now + Duration::days(31))
            .await
            .unwrap();
        assert!(matches!(result, SessionValidation::Invalid(InvalidReason::Expired)));

        let stored = store
            .find_session_by_token(&session.session_token)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.is_active);
        // Stays invalid even if asked again within what would have been the window.
        let again = manager.validate(&session.session_token, now).await.unwrap();
        assert!(matches!(again, SessionValidation::Invalid(InvalidReason::Revoked)));
    }

    #[tokio::test]
    async fn activity_never_extends_past_the_absolute_cap() {
        let (_, manager) = manager();
        let created = Utc::now();
        let session = manager
            .create_session(Uuid::new_v4(), "F1", DeviceInfo::default(), created)
            .await
            .unwrap();

        let mut at = created;
        for _ in 0..4 {
            at += Duration::days(20);
            if let SessionValidation::Valid(s) = manager.validate(&session.session_token, at).await.unwrap() {
                assert!(s.expires_at <= created + Duration::days(90));
            }
        }
        let past_cap = created + Duration::days(90) + Duration::seconds(1);
        let result = manager.validate(&session.session_token, past_cap).await.unwrap();
        assert!(matches!(result, SessionValidation::Invalid(InvalidReason::Expired)));
    }

    #[tokio::test]
    async fn never_issued_tokens_are_unknown() {
        let (_, manager) = manager();
        let result = manager.validate(&generate_token(), Utc::now()).await.unwrap();
        assert!(matches!(result, SessionValidation::Invalid(InvalidReason::Unknown)));
    }

    #[tokio::test]
    async fn logout_revokes_and_logout_everywhere_covers_all_devices() {
        let (_, manager) = manager();
        let identity = Uuid::new_v4();
        let now = Utc::now();
        let phone = manager
            .create_session(identity, "phone", DeviceInfo::default(), now)
            .await
            .unwrap();
        let laptop = manager
            .create_session(identity, "laptop", DeviceInfo::default(), now)
            .await
            .unwrap();

        manager.invalidate(phone.id).await.unwrap();
        assert!(manager.validate(&phone.session_token, now).await.unwrap().into_session().is_none());
        assert!(manager.validate(&laptop.session_token, now).await.unwrap().into_session().is_some());

        assert_eq!(manager.invalidate_all_for_identity(identity).await.unwrap(), 1);
        assert!(manager.validate(&laptop.session_token, now).await.unwrap().into_session().is_none());
    }

    #[tokio::test]
    async fn record_activity_accumulates_counters() {
        let (store, manager) = manager();
        let session = manager
            .create_session(Uuid::new_v4(), "F1", DeviceInfo::default(), Utc::now())
            .await
            .unwrap();
        manager.record_activity(session.id, 2, 40).await.unwrap();
        manager.record_activity(session.id, 1, 20).await.unwrap();

        let stored = store
            .find_session_by_token(&session.session_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.page_views, 3);
        assert_eq!(stored.session_duration_secs, 60);
    }
}
