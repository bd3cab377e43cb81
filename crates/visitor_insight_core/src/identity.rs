//! crates/visitor_insight_core/src/identity.rs
//!
//! Fingerprint-to-identity resolution. A best-effort probabilistic merge:
//! the same person may occasionally be treated as new, but two people should
//! almost never be merged, which is why an email match wins over a fingerprint
//! match whenever an email is supplied.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{CustomData, Event, EventData, Identity};
use crate::ports::{PortResult, SignalCaps, SignalMerge, VisitorStore};

/// How a resolution found (or did not find) its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    Email,
    Fingerprint,
    New,
}

impl MatchedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchedBy::Email => "email",
            MatchedBy::Fingerprint => "fingerprint",
            MatchedBy::New => "new",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub identity: Identity,
    pub recognized: bool,
    pub matched_by: MatchedBy,
    /// The identity has accumulated enough distinct devices or addresses to
    /// look like a shared machine, a bot, or abuse.
    pub suspicious: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverSettings {
    pub caps: SignalCaps,
    pub suspicious_fingerprints: usize,
    pub suspicious_ips: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            caps: SignalCaps::default(),
            suspicious_fingerprints: 10,
            suspicious_ips: 10,
        }
    }
}

pub struct IdentityResolver {
    store: Arc<dyn VisitorStore>,
    settings: ResolverSettings,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn VisitorStore>) -> Self {
        Self::with_settings(store, ResolverSettings::default())
    }

    pub fn with_settings(store: Arc<dyn VisitorStore>, settings: ResolverSettings) -> Self {
        Self { store, settings }
    }

    /// Finds or creates the identity behind a fingerprint, preferring an email match.
    pub async fn resolve(
        &self,
        fingerprint: &str,
        ip: &str,
        email: Option<&str>,
        now: DateTime<Utc>,
    ) -> PortResult<Resolution> {
        let email = email.map(str::trim).filter(|e| !e.is_empty());

        let mut matched = None;
        if let Some(email) = email {
            let candidates = self.store.find_identities_by_email(email).await?;
            matched = pick_candidate(candidates, "email").map(|i| (i, MatchedBy::Email));
        }
        if matched.is_none() {
            let candidates = self.store.find_identities_by_fingerprint(fingerprint).await?;
            matched = pick_candidate(candidates, "fingerprint").map(|i| (i, MatchedBy::Fingerprint));
        }

        let resolution = match matched {
            Some((existing, matched_by)) => {
                let merge = SignalMerge {
                    fingerprint,
                    ip,
                    email,
                    seen_at: now,
                    caps: self.settings.caps,
                };
                let identity = self.store.merge_identity_signals(existing.id, merge).await?;
                let suspicious = self.is_suspicious(&identity);
                if suspicious {
                    warn!(
                        identity_id = %identity.id,
                        fingerprints = identity.device_fingerprints.len(),
                        ips = identity.known_ips.len(),
                        "Identity has accumulated an unusual number of devices or addresses"
                    );
                }
                info!(identity_id = %identity.id, matched_by = matched_by.as_str(), "Recognized returning visitor");
                Resolution {
                    identity,
                    recognized: true,
                    matched_by,
                    suspicious,
                }
            }
            None => {
                let identity = self
                    .store
                    .upsert_identity(Identity::new(fingerprint, ip, email, now))
                    .await?;
                info!(identity_id = %identity.id, "Created new identity");
                Resolution {
                    identity,
                    recognized: false,
                    matched_by: MatchedBy::New,
                    suspicious: false,
                }
            }
        };

        self.record_audit(&resolution, now).await;
        Ok(resolution)
    }

    fn is_suspicious(&self, identity: &Identity) -> bool {
        identity.device_fingerprints.len() >= self.settings.suspicious_fingerprints
            || identity.known_ips.len() >= self.settings.suspicious_ips
    }

    async fn record_audit(&self, resolution: &Resolution, now: DateTime<Utc>) {
        let mut properties = BTreeMap::new();
        properties.insert("recognized".to_string(), json!(resolution.recognized));
        properties.insert("matched_by".to_string(), json!(resolution.matched_by.as_str()));
        properties.insert("suspicious".to_string(), json!(resolution.suspicious));
        let event = Event::new(
            resolution.identity.id,
            None,
            EventData::Custom(CustomData {
                name: "identity_resolved".to_string(),
                properties,
            }),
            now,
        );
        if let Err(e) = self.store.append_event(event).await {
            warn!(identity_id = %resolution.identity.id, error = %e, "Failed to record identity resolution audit event");
        }
    }
}

/// Deterministic tie-break: the most recently active candidate wins.
fn pick_candidate(candidates: Vec<Identity>, signal: &str) -> Option<Identity> {
    if candidates.len() > 1 {
        warn!(
            signal,
            candidates = candidates.len(),
            "Ambiguous identity match, choosing the most recently active"
        );
    }
    candidates
        .into_iter()
        .max_by(|a, b| a.last_seen.cmp(&b.last_seen).then(a.id.cmp(&b.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use crate::memory_store::MemoryStore;
    use crate::ports::EventQuery;
    use chrono::Duration;

    fn resolver() -> (Arc<MemoryStore>, IdentityResolver) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), IdentityResolver::new(store))
    }

    #[tokio::test]
    async fn unknown_fingerprint_creates_identity() {
        let (_, resolver) = resolver();
        let res = resolver.resolve("F1", "10.0.0.1", None, Utc::now()).await.unwrap();

        assert!(!res.recognized);
        assert_eq!(res.matched_by, MatchedBy::New);
        assert_eq!(res.identity.device_fingerprints, vec!["F1"]);
        assert_eq!(res.identity.known_ips, vec!["10.0.0.1"]);
    }

    #[tokio::test]
    async fn known_fingerprint_is_recognized_and_counters_bumped() {
        let (_, resolver) = resolver();
        let now = Utc::now();
        let first = resolver.resolve("F1", "10.0.0.1", None, now).await.unwrap();
        let second = resolver
            .resolve("F1", "10.0.0.2", None, now + Duration::hours(1))
            .await
            .unwrap();

        assert!(second.recognized);
        assert_eq!(second.identity.id, first.identity.id);
        assert_eq!(second.identity.login_count, 2);
        assert_eq!(second.identity.known_ips, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(second.identity.last_seen, now + Duration::hours(1));
    }

    #[tokio::test]
    async fn email_takes_precedence_over_fingerprint() {
        let (_, resolver) = resolver();
        let now = Utc::now();
        let original = resolver
            .resolve("F1", "10.0.0.1", Some("a@x.com"), now)
            .await
            .unwrap();
        // F3 belongs to someone else entirely.
        let other = resolver.resolve("F3", "10.0.0.9", None, now).await.unwrap();

        let res = resolver
            .resolve("F2", "10.0.0.5", Some("A@X.com"), now)
            .await
            .unwrap();
        assert_eq!(res.identity.id, original.identity.id);
        assert_eq!(res.matched_by, MatchedBy::Email);
        assert!(res.identity.device_fingerprints.contains(&"F2".to_string()));

        let res = resolver
            .resolve("F3", "10.0.0.9", Some("a@x.com"), now)
            .await
            .unwrap();
        assert_eq!(res.identity.id, original.identity.id);
        assert_ne!(res.identity.id, other.identity.id);
    }

    #[tokio::test]
    async fn fingerprint_match_attaches_a_new_email() {
        let (store, resolver) = resolver();
        let created = resolver.resolve("F1", "ip", None, Utc::now()).await.unwrap();
        resolver
            .resolve("F1", "ip", Some("new@x.com"), Utc::now())
            .await
            .unwrap();

        let identity = store.get_identity(created.identity.id).await.unwrap();
        assert_eq!(identity.email.as_deref(), Some("new@x.com"));
    }

    #[tokio::test]
    async fn ambiguous_fingerprint_prefers_most_recently_active() {
        let (store, resolver) = resolver();
        let now = Utc::now();
        let mut stale = Identity::new("shared", "ip", None, now - Duration::days(10));
        stale.last_seen = now - Duration::days(5);
        let fresh = Identity::new("shared", "ip", None, now - Duration::hours(1));
        store.upsert_identity(stale).await.unwrap();
        let fresh = store.upsert_identity(fresh).await.unwrap();

        let res = resolver.resolve("shared", "ip", None, now).await.unwrap();
        assert_eq!(res.identity.id, fresh.id);
    }

    #[tokio::test]
    async fn signal_sets_are_capped_and_flagged_as_suspicious() {
        let store = Arc::new(MemoryStore::new());
        let settings = ResolverSettings {
            caps: SignalCaps {
                max_fingerprints: 4,
                max_ips: 4,
            },
            suspicious_fingerprints: 3,
            suspicious_ips: 10,
        };
        let resolver = IdentityResolver::with_settings(store.clone(), settings);
        let now = Utc::now();
        resolver.resolve("F0", "ip", Some("bot@x.com"), now).await.unwrap();

        let mut last = None;
        for i in 1..6 {
            last = Some(
                resolver
                    .resolve(&format!("F{}", i), "ip", Some("bot@x.com"), now)
                    .await
                    .unwrap(),
            );
        }
        let last = last.unwrap();
        assert_eq!(last.identity.device_fingerprints, vec!["F2", "F3", "F4", "F5"]);
        assert_eq!(last.identity.known_ips, vec!["ip"]);
        assert!(last.suspicious);
    }

    #[tokio::test]
    async fn every_resolution_is_audited() {
        let (store, resolver) = resolver();
        let res = resolver.resolve("F1", "ip", None, Utc::now()).await.unwrap();
        resolver.resolve("F1", "ip", None, Utc::now()).await.unwrap();

        let query = EventQuery {
            visitor_id: Some(res.identity.id),
            types: vec![EventType::Custom],
            ..Default::default()
        };
        let events = store.list_events(&query).await.unwrap();
        assert_eq!(events.len(), 2);
        let recognized: Vec<bool> = events
            .iter()
            .filter_map(|e| match &e.payload {
                EventData::Custom(c) => c.properties["recognized"].as_bool(),
                _ => None,
            })
            .collect();
        assert!(recognized.contains(&true) && recognized.contains(&false));
    }
}
