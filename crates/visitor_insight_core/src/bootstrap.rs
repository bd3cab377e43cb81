//! crates/visitor_insight_core/src/bootstrap.rs
//!
//! First contact for a page load: resolve the identity behind a device
//! signature, issue a session and make sure a visitor record exists.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::attribution;
use crate::domain::{Attribution, DeviceInfo, Identity, Session, Visitor};
use crate::identity::{IdentityResolver, MatchedBy};
use crate::ports::{PortError, PortResult, VisitorActivity, VisitorStore};
use crate::session::SessionManager;

#[derive(Debug, Clone)]
pub struct BootstrapRequest {
    pub fingerprint: String,
    pub ip: String,
    pub email: Option<String>,
    pub device_info: DeviceInfo,
    /// Raw landing attribution; classified before it is stored.
    pub attribution: Attribution,
}

#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub identity: Identity,
    pub session: Session,
    pub recognized: bool,
    pub matched_by: MatchedBy,
    pub suspicious: bool,
}

pub struct BootstrapService {
    store: Arc<dyn VisitorStore>,
    resolver: Arc<IdentityResolver>,
    sessions: Arc<SessionManager>,
}

impl BootstrapService {
    pub fn new(
        store: Arc<dyn VisitorStore>,
        resolver: Arc<IdentityResolver>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            store,
            resolver,
            sessions,
        }
    }

    pub async fn bootstrap(&self, request: BootstrapRequest, now: DateTime<Utc>) -> PortResult<Bootstrap> {
        let fingerprint = request.fingerprint.trim();
        if fingerprint.is_empty() {
            return Err(PortError::InvalidInput("fingerprint must not be empty".to_string()));
        }

        let resolution = self
            .resolver
            .resolve(fingerprint, &request.ip, request.email.as_deref(), now)
            .await?;
        let identity = resolution.identity;

        let session = self
            .sessions
            .create_session(identity.id, fingerprint, request.device_info, now)
            .await?;

        let mut visitor = Visitor::new(identity.id, attribution::classify(request.attribution), now);
        visitor.email = identity.email.clone();
        let channel = visitor.attribution.traffic_channel.clone();
        if self.store.insert_visitor_if_absent(visitor).await? {
            info!(visitor_id = %identity.id, channel = %channel, "Visitor record created");
        } else {
            debug!(visitor_id = %identity.id, "Visitor record already present");
            let activity = VisitorActivity {
                at: now,
                email: identity.email.clone(),
                ..Default::default()
            };
            self.store.record_visitor_activity(identity.id, activity).await?;
        }

        Ok(Bootstrap {
            identity,
            session,
            recognized: resolution.recognized,
            matched_by: resolution.matched_by,
            suspicious: resolution.suspicious,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::session::SessionSettings;

    fn service() -> (Arc<MemoryStore>, BootstrapService) {
        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(IdentityResolver::new(store.clone()));
        let sessions = Arc::new(SessionManager::new(store.clone(), SessionSettings::default()));
        let service = BootstrapService::new(store.clone(), resolver, sessions);
        (store, service)
    }

    fn request(fingerprint: &str) -> BootstrapRequest {
        BootstrapRequest {
            fingerprint: fingerprint.to_string(),
            ip: "203.0.113.7".to_string(),
            email: None,
            device_info: DeviceInfo::default(),
            attribution: Attribution {
                utm_source: Some("newsletter".to_string()),
                utm_medium: Some("email".to_string()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn first_visit_creates_identity_session_and_classified_visitor() {
        let (store, service) = service();
        let now = Utc::now();

        let boot = service.bootstrap(request("fp-1"), now).await.unwrap();
        assert!(!boot.recognized);
        assert_eq!(boot.matched_by, MatchedBy::New);
        assert_eq!(boot.session.identity_id, boot.identity.id);

        let visitor = store.get_visitor(boot.identity.id).await.unwrap().unwrap();
        assert_eq!(visitor.attribution.traffic_channel, "email");
        assert_eq!(visitor.attribution.traffic_source, "newsletter");
    }

    #[tokio::test]
    async fn returning_device_is_recognized_and_keeps_first_attribution() {
        let (store, service) = service();
        let now = Utc::now();
        let first = service.bootstrap(request("fp-1"), now).await.unwrap();

        let mut again = request("fp-1");
        again.attribution = Attribution::default();
        let second = service
            .bootstrap(again, now + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert!(second.recognized);
        assert_eq!(second.identity.id, first.identity.id);
        assert_ne!(second.session.session_token, first.session.session_token);
        let visitor = store.get_visitor(first.identity.id).await.unwrap().unwrap();
        assert_eq!(visitor.attribution.traffic_source, "newsletter");
        assert_eq!(visitor.last_seen, now + chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn blank_fingerprint_is_rejected() {
        let (_, service) = service();
        let err = service.bootstrap(request("   "), Utc::now()).await;
        assert!(matches!(err, Err(PortError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn concurrent_tab_bootstrap_keeps_event_counters() {
        let (store, service) = service();
        let now = Utc::now();
        let first = service.bootstrap(request("fp-tabs"), now).await.unwrap();

        for path in ["/", "/psalms/23", "/john/3"] {
            let activity = VisitorActivity {
                at: now,
                page: Some(path.to_string()),
                interacted_with_sam: true,
                ..Default::default()
            };
            store.record_visitor_activity(first.identity.id, activity).await.unwrap();
        }

        let second = service.bootstrap(request("fp-tabs"), now).await.unwrap();
        assert_eq!(second.identity.id, first.identity.id);
        let visitor = store.get_visitor(first.identity.id).await.unwrap().unwrap();
        assert_eq!(visitor.page_views, 3);
        assert!(visitor.interacted_with_sam);
        assert_eq!(visitor.pages_visited.len(), 3);
    }
}
