//! crates/visitor_insight_core/src/scoring/heuristics.rs
//!
//! The default scoring strategies: capped linear combinations over activity
//! metrics. Directional, not calibrated probabilities.

use chrono::{DateTime, Duration, Utc};

use super::metrics::ActivityMetrics;
use super::{
    ChurnModel, EngagementBreakdown, EngagementModel, LeadScoreModel, LifetimeValueModel,
    NextActionPolicy, NextBestAction, Psychographic,
};

/// Each sub-metric's ceiling, applied before summing.
pub mod caps {
    pub const READING: u32 = 20;
    pub const LISTENING: u32 = 15;
    pub const CHAT: u32 = 15;
    pub const HIGHLIGHTS: u32 = 10;
    pub const NOTES: u32 = 10;
    pub const MESSAGES: u32 = 10;
    pub const EMAIL: u32 = 10;
    pub const COUNSELOR: u32 = 10;
}

const HIGH_ENGAGEMENT: u8 = 50;
const HEAVY_USE_SECS: u64 = 30 * 60;
const DEEP_CHAT_MESSAGES: u32 = 20;

fn minutes(secs: u64) -> u32 {
    u32::try_from(secs / 60).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicModel;

impl EngagementModel for HeuristicModel {
    fn engagement(&self, m: &ActivityMetrics) -> EngagementBreakdown {
        let breakdown = EngagementBreakdown {
            reading: minutes(m.reading_secs).min(caps::READING),
            listening: minutes(m.listening_secs).min(caps::LISTENING),
            chat: minutes(m.chat_secs).min(caps::CHAT),
            highlights: m.highlights.saturating_mul(2).min(caps::HIGHLIGHTS),
            notes: m.notes.saturating_mul(2).min(caps::NOTES),
            messages: m.messages_sent.min(caps::MESSAGES),
            email: if m.email_captured { caps::EMAIL } else { 0 },
            counselor: if m.counselor_mode { caps::COUNSELOR } else { 0 },
            total: 0,
        };
        let sum = breakdown.reading
            + breakdown.listening
            + breakdown.chat
            + breakdown.highlights
            + breakdown.notes
            + breakdown.messages
            + breakdown.email
            + breakdown.counselor;
        EngagementBreakdown {
            total: sum.min(100) as u8,
            ..breakdown
        }
    }
}

impl LeadScoreModel for HeuristicModel {
    fn lead_score(&self, m: &ActivityMetrics) -> u8 {
        let mut score = m.page_views.saturating_mul(2).min(20) + m.windows_opened.saturating_mul(5).min(20);
        if m.interacted_with_sam {
            score += 15;
        }
        if m.counselor_mode {
            score += 20;
        }
        if m.email_captured {
            score += 15;
        }
        if m.purchased() {
            score += 10;
        }
        score.min(100) as u8
    }
}

impl ChurnModel for HeuristicModel {
    fn churn_risk(&self, m: &ActivityMetrics, engagement: u8, now: DateTime<Utc>) -> u8 {
        let mut risk: i32 = 50;
        if m.reading_streak_days < 2 {
            risk += 15;
        }
        if m.listening_days < 2 {
            risk += 10;
        }
        if m.last_seen.map_or(true, |seen| now - seen > Duration::days(7)) {
            risk += 10;
        }
        if m.sessions <= 1 {
            risk += 10;
        }
        if engagement >= 60 {
            risk -= 20;
        }
        if m.reading_streak_days >= 3 {
            risk -= 10;
        }
        if m.purchased() {
            risk -= 25;
        }
        risk.clamp(0, 100) as u8
    }
}

impl LifetimeValueModel for HeuristicModel {
    fn lifetime_value(&self, m: &ActivityMetrics, engagement: u8) -> f64 {
        let loyalty = f64::from(m.active_days.saturating_mul(5).min(50));
        let conversation_depth = (f64::from(m.messages_sent) * 0.5).min(25.0);
        let readiness = if m.email_captured { 20.0 } else { 0.0 }
            + if m.counselor_mode { 15.0 } else { 0.0 };
        let value = f64::from(engagement)
            + f64::from(m.highlights) * 2.0
            + f64::from(m.notes) * 3.0
            + loyalty
            + conversation_depth
            + readiness;
        (value * 100.0).round() / 100.0
    }
}

impl NextActionPolicy for HeuristicModel {
    fn next_action(&self, m: &ActivityMetrics, engagement: u8) -> NextBestAction {
        if !m.email_captured && engagement >= HIGH_ENGAGEMENT {
            return NextBestAction::AggressiveEmailCapture;
        }
        if !m.email_captured {
            return NextBestAction::SoftEmailCapture;
        }
        if m.reading_secs >= HEAVY_USE_SECS {
            return NextBestAction::UpsellReadingPlan;
        }
        if m.listening_secs >= HEAVY_USE_SECS {
            return NextBestAction::UpsellAudio;
        }
        if m.messages_sent >= DEEP_CHAT_MESSAGES {
            return NextBestAction::UpsellCounselor;
        }
        NextBestAction::Nurture
    }
}

/// Dominant activity dimension, with a two-minute floor before any label sticks.
pub fn classify_psychographic(m: &ActivityMetrics) -> Psychographic {
    let chat = m
        .chat_secs
        .saturating_add(u64::from(m.messages_sent).saturating_mul(30));
    let reading = m
        .reading_secs
        .saturating_add((u64::from(m.highlights) + u64::from(m.notes)).saturating_mul(60));
    let listening = m.listening_secs;

    let dominant = chat.max(reading).max(listening);
    if dominant < 120 {
        return Psychographic::Browser;
    }
    if chat == dominant {
        Psychographic::Seeker
    } else if reading == dominant {
        Psychographic::Scholar
    } else {
        Psychographic::Listener
    }
}

/// Hot / warm / cold from recency combined with the lead score. Recency wins.
pub fn lead_temperature(
    last_seen: DateTime<Utc>,
    lead_score: u8,
    now: DateTime<Utc>,
) -> super::LeadTemperature {
    let since = (now - last_seen).max(Duration::zero());
    if since <= Duration::minutes(30) && lead_score >= 60 {
        super::LeadTemperature::Hot
    } else if since <= Duration::hours(24) && lead_score >= 40 {
        super::LeadTemperature::Warm
    } else {
        super::LeadTemperature::Cold
    }
}
