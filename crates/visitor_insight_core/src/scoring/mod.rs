//! crates/visitor_insight_core/src/scoring/mod.rs
//!
//! The scoring engine turns one visitor's record and events into an
//! `EngagementProfile`. Scoring is a pure function of its inputs and `now`;
//! each formula sits behind a strategy trait so it can be replaced without
//! touching callers.

pub mod heuristics;
pub mod metrics;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Event, Visitor};
pub use heuristics::{classify_psychographic, lead_temperature, HeuristicModel};
pub use metrics::ActivityMetrics;

//=========================================================================================
// Outputs
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadTemperature {
    Hot,
    Warm,
    Cold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextBestAction {
    AggressiveEmailCapture,
    SoftEmailCapture,
    UpsellReadingPlan,
    UpsellAudio,
    UpsellCounselor,
    Nurture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Psychographic {
    /// Drawn to conversation with the assistant.
    Seeker,
    /// Reads, highlights and takes notes.
    Scholar,
    Listener,
    Browser,
}

/// Capped sub-scores and their clamped sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngagementBreakdown {
    pub reading: u32,
    pub listening: u32,
    pub chat: u32,
    pub highlights: u32,
    pub notes: u32,
    pub messages: u32,
    pub email: u32,
    pub counselor: u32,
    pub total: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngagementProfile {
    pub visitor_id: Uuid,
    pub engagement_score: u8,
    pub engagement_breakdown: EngagementBreakdown,
    pub lead_score: u8,
    pub temperature: LeadTemperature,
    pub churn_risk: u8,
    /// Dimensionless value units for ranking, not currency.
    pub lifetime_value: f64,
    pub next_best_action: NextBestAction,
    pub psychographic: Psychographic,
    pub metrics: ActivityMetrics,
}

//=========================================================================================
// Strategy Traits
//=========================================================================================

pub trait EngagementModel: Send + Sync {
    fn engagement(&self, metrics: &ActivityMetrics) -> EngagementBreakdown;
}

pub trait LeadScoreModel: Send + Sync {
    fn lead_score(&self, metrics: &ActivityMetrics) -> u8;
}

pub trait ChurnModel: Send + Sync {
    fn churn_risk(&self, metrics: &ActivityMetrics, engagement: u8, now: DateTime<Utc>) -> u8;
}

pub trait LifetimeValueModel: Send + Sync {
    fn lifetime_value(&self, metrics: &ActivityMetrics, engagement: u8) -> f64;
}

pub trait NextActionPolicy: Send + Sync {
    fn next_action(&self, metrics: &ActivityMetrics, engagement: u8) -> NextBestAction;
}

//=========================================================================================
// Engine
//=========================================================================================

#[derive(Clone)]
pub struct ScoringEngine {
    engagement: Arc<dyn EngagementModel>,
    lead_score: Arc<dyn LeadScoreModel>,
    churn: Arc<dyn ChurnModel>,
    lifetime_value: Arc<dyn LifetimeValueModel>,
    next_action: Arc<dyn NextActionPolicy>,
}

impl Default for ScoringEngine {
    fn default() -> Self {
        let model = Arc::new(HeuristicModel);
        Self {
            engagement: model.clone(),
            lead_score: model.clone(),
            churn: model.clone(),
            lifetime_value: model.clone(),
            next_action: model,
        }
    }
}

impl ScoringEngine {
    pub fn with_engagement_model(mut self, model: Arc<dyn EngagementModel>) -> Self {
        self.engagement = model;
        self
    }

    pub fn with_lead_score_model(mut self, model: Arc<dyn LeadScoreModel>) -> Self {
        self.lead_score = model;
        self
    }

    pub fn with_churn_model(mut self, model: Arc<dyn ChurnModel>) -> Self {
        self.churn = model;
        self
    }

    pub fn with_lifetime_value_model(mut self, model: Arc<dyn LifetimeValueModel>) -> Self {
        self.lifetime_value = model;
        self
    }

    pub fn with_next_action_policy(mut self, policy: Arc<dyn NextActionPolicy>) -> Self {
        self.next_action = policy;
        self
    }

    pub fn lead_score(&self, visitor: &Visitor, events: &[Event]) -> u8 {
        self.lead_score
            .lead_score(&ActivityMetrics::from_events(visitor, events))
    }

    pub fn score(&self, visitor: &Visitor, events: &[Event], now: DateTime<Utc>) -> EngagementProfile {
        let metrics = ActivityMetrics::from_events(visitor, events);
        let breakdown = self.engagement.engagement(&metrics);
        let engagement = breakdown.total.min(100);
        let lead_score = self.lead_score.lead_score(&metrics).min(100);
        let last_seen = metrics.last_seen.unwrap_or(visitor.last_seen);

        EngagementProfile {
            visitor_id: visitor.id,
            engagement_score: engagement,
            engagement_breakdown: breakdown,
            lead_score,
            temperature: lead_temperature(last_seen, lead_score, now),
            churn_risk: self.churn.churn_risk(&metrics, engagement, now).min(100),
            lifetime_value: self.lifetime_value.lifetime_value(&metrics, engagement),
            next_best_action: self.next_action.next_action(&metrics, engagement),
            psychographic: classify_psychographic(&metrics),
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Attribution, EventData, HeartbeatData, SamChatData};
    use chrono::Duration;

    fn sample(now: DateTime<Utc>) -> (Visitor, Vec<Event>) {
        let visitor = Visitor::new(Uuid::new_v4(), Attribution::default(), now - Duration::days(2));
        let events = vec![
            Event::new(
                visitor.id,
                None,
                EventData::Heartbeat(HeartbeatData {
                    reading_secs: 900,
                    highlights: 3,
                    ..Default::default()
                }),
                now - Duration::minutes(20),
            ),
            Event::new(
                visitor.id,
                None,
                EventData::SamChat(SamChatData {
                    messages_sent: 6,
                    duration_secs: 240,
                }),
                now - Duration::minutes(5),
            ),
        ];
        (visitor, events)
    }

    #[test]
    fn scoring_is_deterministic() {
        let now = Utc::now();
        let (visitor, events) = sample(now);
        let engine = ScoringEngine::default();

        let a = engine.score(&visitor, &events, now);
        let b = engine.score(&visitor, &events, now);
        assert_eq!(serde_json::to_value(&a).unwrap(), serde_json::to_value(&b).unwrap());
        // 15 reading + 4 chat + 6 highlights + 6 messages
        assert_eq!(a.engagement_score, 31);
        assert_eq!(a.next_best_action, NextBestAction::SoftEmailCapture);
        assert_eq!(a.metrics.last_seen, Some(now - Duration::minutes(5)));
    }

    struct AlwaysNurture;

    impl NextActionPolicy for AlwaysNurture {
        fn next_action(&self, _: &ActivityMetrics, _: u8) -> NextBestAction {
            NextBestAction::Nurture
        }
    }

    #[test]
    fn strategies_can_be_swapped() {
        let now = Utc::now();
        let (visitor, events) = sample(now);
        let engine = ScoringEngine::default().with_next_action_policy(Arc::new(AlwaysNurture));
        assert_eq!(engine.score(&visitor, &events, now).next_best_action, NextBestAction::Nurture);
    }
}
