//! crates/visitor_insight_core/src/scoring/metrics.rs
//!
//! Folds a visitor record and its events into the raw activity numbers every
//! scoring strategy works from.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::{Event, EventData, Visitor};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivityMetrics {
    pub page_views: u32,
    pub windows_opened: u32,
    pub reading_secs: u64,
    pub listening_secs: u64,
    pub chat_secs: u64,
    pub highlights: u32,
    pub notes: u32,
    pub messages_sent: u32,
    pub sessions: u32,
    pub active_days: u32,
    /// Longest run of consecutive days with reading activity.
    pub reading_streak_days: u32,
    pub listening_days: u32,
    pub interacted_with_sam: bool,
    pub email_captured: bool,
    pub counselor_mode: bool,
    pub purchases: u32,
    pub revenue_cents: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

impl ActivityMetrics {
    /// Events belonging to other visitors are ignored. Counters that also live on
    /// the visitor record take whichever is larger, so a windowed event slice never
    /// under-reports what the record already knows.
    pub fn from_events(visitor: &Visitor, events: &[Event]) -> Self {
        let mut m = ActivityMetrics {
            interacted_with_sam: visitor.interacted_with_sam,
            email_captured: visitor.has_email(),
            counselor_mode: visitor.enabled_counselor_mode,
            last_seen: Some(visitor.last_seen),
            ..Default::default()
        };
        let mut page_events = 0u32;
        let mut windows: BTreeSet<&str> = visitor.windows_opened.iter().map(String::as_str).collect();
        let mut sessions: BTreeSet<Uuid> = BTreeSet::new();
        let mut days: BTreeSet<NaiveDate> = BTreeSet::new();
        let mut reading_days: BTreeSet<NaiveDate> = BTreeSet::new();
        let mut listening_days: BTreeSet<NaiveDate> = BTreeSet::new();

        for event in events.iter().filter(|e| e.visitor_id == visitor.id) {
            let day = event.timestamp.date_naive();
            if !matches!(event.payload, EventData::Custom(_)) {
                days.insert(day);
            }
            if let Some(session_id) = event.session_id {
                sessions.insert(session_id);
            }
            m.last_seen = m.last_seen.max(Some(event.timestamp));

            match &event.payload {
                EventData::PageView(_) => page_events += 1,
                EventData::WindowOpen(w) => {
                    windows.insert(w.window.as_str());
                }
                EventData::EmailCapture(_) => m.email_captured = true,
                EventData::CounselorModeEnabled(_) => m.counselor_mode = true,
                EventData::Purchase(p) => {
                    m.purchases = m.purchases.saturating_add(1);
                    m.revenue_cents = m.revenue_cents.saturating_add(p.amount_cents);
                }
                EventData::SamChat(chat) => {
                    m.interacted_with_sam = true;
                    m.messages_sent = m.messages_sent.saturating_add(chat.messages_sent);
                    m.chat_secs = m.chat_secs.saturating_add(chat.duration_secs);
                }
                EventData::Heartbeat(beat) => {
                    m.reading_secs = m.reading_secs.saturating_add(beat.reading_secs);
                    m.listening_secs = m.listening_secs.saturating_add(beat.listening_secs);
                    m.chat_secs = m.chat_secs.saturating_add(beat.chat_secs);
                    m.highlights = m.highlights.saturating_add(beat.highlights);
                    m.notes = m.notes.saturating_add(beat.notes);
                    if beat.reading_secs > 0 {
                        reading_days.insert(day);
                    }
                    if beat.listening_secs > 0 {
                        listening_days.insert(day);
                    }
                }
                EventData::Custom(_) => {}
            }
        }

        m.page_views = visitor.page_views.max(page_events);
        m.windows_opened = windows.len() as u32;
        m.sessions = sessions.len() as u32;
        m.active_days = days.len() as u32;
        m.reading_streak_days = longest_streak(&reading_days);
        m.listening_days = listening_days.len() as u32;
        if visitor.purchased_credits && m.purchases == 0 {
            m.purchases = 1;
        }
        m
    }

    pub fn purchased(&self) -> bool {
        self.purchases > 0
    }
}

fn longest_streak(days: &BTreeSet<NaiveDate>) -> u32 {
    let mut best = 0;
    let mut current = 0;
    let mut previous: Option<NaiveDate> = None;
    for day in days {
        current = match previous.and_then(|p| p.succ_opt()) {
            Some(next) if next == *day => current + 1,
            _ => 1,
        };
        best = best.max(current);
        previous = Some(*day);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Attribution, HeartbeatData, SamChatData};
    use chrono::{Duration, TimeZone};

    fn beat(visitor: Uuid, at: DateTime<Utc>, reading: u64, listening: u64) -> Event {
        Event::new(
            visitor,
            None,
            EventData::Heartbeat(HeartbeatData {
                reading_secs: reading,
                listening_secs: listening,
                highlights: 1,
                ..Default::default()
            }),
            at,
        )
    }

    #[test]
    fn streaks_and_totals_are_derived_from_events() {
        let day0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let visitor = Visitor::new(Uuid::new_v4(), Attribution::default(), day0);
        let events = vec![
            beat(visitor.id, day0, 60, 0),
            beat(visitor.id, day0 + Duration::days(1), 60, 30),
            beat(visitor.id, day0 + Duration::days(2), 60, 0),
            beat(visitor.id, day0 + Duration::days(4), 60, 30),
            Event::new(
                visitor.id,
                None,
                EventData::SamChat(SamChatData {
                    messages_sent: 4,
                    duration_secs: 90,
                }),
                day0,
            ),
            // Another visitor's activity never leaks in.
            beat(Uuid::new_v4(), day0, 9999, 9999),
        ];

        let m = ActivityMetrics::from_events(&visitor, &events);
        assert_eq!(m.reading_secs, 240);
        assert_eq!(m.listening_secs, 60);
        assert_eq!(m.chat_secs, 90);
        assert_eq!(m.highlights, 4);
        assert_eq!(m.messages_sent, 4);
        assert_eq!(m.reading_streak_days, 3);
        assert_eq!(m.listening_days, 2);
        assert_eq!(m.active_days, 4);
        assert!(m.interacted_with_sam);
        assert_eq!(m.last_seen, Some(day0 + Duration::days(4)));
    }

    #[test]
    fn visitor_flags_count_even_without_events() {
        let now = Utc::now();
        let mut visitor = Visitor::new(Uuid::new_v4(), Attribution::default(), now);
        visitor.email = Some("a@x.com".to_string());
        visitor.purchased_credits = true;
        visitor.page_views = 7;

        let m = ActivityMetrics::from_events(&visitor, &[]);
        assert!(m.email_captured);
        assert!(m.purchased());
        assert_eq!(m.page_views, 7);
    }

    #[test]
    fn oversized_client_counters_saturate() {
        let now = Utc::now();
        let visitor = Visitor::new(Uuid::new_v4(), Attribution::default(), now);
        let huge = |at| {
            Event::new(
                visitor.id,
                None,
                EventData::Heartbeat(HeartbeatData {
                    reading_secs: u64::MAX / 2 + 1,
                    chat_secs: u64::MAX / 2 + 1,
                    highlights: u32::MAX / 2 + 1,
                    notes: u32::MAX / 2 + 1,
                    ..Default::default()
                }),
                at,
            )
        };
        let events = vec![huge(now - Duration::minutes(2)), huge(now - Duration::minutes(1))];

        let m = ActivityMetrics::from_events(&visitor, &events);
        assert_eq!(m.highlights, u32::MAX);
        assert_eq!(m.notes, u32::MAX);
        assert_eq!(m.reading_secs, u64::MAX);

        let profile = crate::scoring::ScoringEngine::default().score(&visitor, &events, now);
        assert!(profile.engagement_score <= 100);
    }
}
