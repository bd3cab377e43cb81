//! crates/visitor_insight_core/src/report.rs
//!
//! The aggregation layer: folds a set of visitors and events into traffic,
//! funnel, revenue, content, temperature and cohort breakdowns.
//!
//! Reports never fail on bad records. Visitors with impossible values and
//! events that cannot be attributed are left out and tallied in `skipped`.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::domain::{Event, EventData, Visitor};
use crate::scoring::{lead_temperature, LeadTemperature};

/// Price used for a purchase that is flagged on the visitor but has no event.
pub const DEFAULT_UNIT_PRICE_CENTS: u64 = 3700;

const COLD_WATCH_MIN_SCORE: u8 = 60;

//=========================================================================================
// Report Types
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ReportWindow {
    fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountRow {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrafficBreakdown {
    pub by_channel: Vec<CountRow>,
    pub by_medium: Vec<CountRow>,
    pub by_source: Vec<CountRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelStep {
    pub step: &'static str,
    pub count: u64,
    /// Percent of all visitors in the report.
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceRevenue {
    pub source: String,
    pub visitors: u64,
    pub email_capture_rate: f64,
    pub purchase_rate: f64,
    pub purchasers: u64,
    pub revenue_cents: u64,
    pub revenue_per_visitor_cents: f64,
    /// Revenue per purchaser; 0 when nobody purchased.
    pub ltv_cents: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentPerformance {
    pub window: String,
    pub opens: u64,
    pub unique_openers: u64,
    pub email_capture_rate: f64,
    pub purchase_rate: f64,
    pub revenue_per_open_cents: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TemperatureBuckets {
    pub hot: u64,
    pub warm: u64,
    pub cold: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadSummary {
    pub visitor_id: Uuid,
    pub email: Option<String>,
    pub lead_score: u8,
    pub temperature: LeadTemperature,
    pub channel: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Cohort {
    /// ISO week of first sight, e.g. `2026-W09`.
    pub week: String,
    pub visitors: u64,
    pub email_captured: u64,
    pub purchased: u64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub visitors: u64,
    pub events: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub window: Option<ReportWindow>,
    pub visitors: u64,
    pub events: u64,
    pub traffic: TrafficBreakdown,
    pub funnel: Vec<FunnelStep>,
    pub revenue_by_source: Vec<SourceRevenue>,
    pub content_performance: Vec<ContentPerformance>,
    pub temperature: TemperatureBuckets,
    pub hot_leads: Vec<LeadSummary>,
    pub cold_leads: Vec<LeadSummary>,
    pub cohorts: Vec<Cohort>,
    pub skipped: Skipped,
}

//=========================================================================================
// Per-visitor Facts
//=========================================================================================

/// What one visitor did, from the record and the events in the window combined.
#[derive(Default)]
struct Facts<'a> {
    page_views: u32,
    windows: BTreeSet<&'a str>,
    chatted: bool,
    email: bool,
    counselor: bool,
    purchase_events: u32,
    revenue_cents: u64,
}

impl Facts<'_> {
    fn engaged(&self) -> bool {
        self.page_views >= 2 || !self.windows.is_empty()
    }

    fn purchased(&self) -> bool {
        self.purchase_events > 0
    }
}

fn is_malformed(visitor: &Visitor) -> bool {
    visitor.lead_score > 100 || visitor.last_seen < visitor.first_seen
}

/// Typed payloads can still carry values that make no sense for their type.
fn is_well_formed(payload: &EventData) -> bool {
    match payload {
        EventData::PageView(p) => !p.path.trim().is_empty(),
        EventData::WindowOpen(w) => !w.window.trim().is_empty(),
        EventData::EmailCapture(c) => c.email.contains('@'),
        EventData::Purchase(p) => !p.product.trim().is_empty(),
        EventData::Custom(c) => !c.name.trim().is_empty(),
        EventData::CounselorModeEnabled(_) | EventData::SamChat(_) | EventData::Heartbeat(_) => true,
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn label(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn ranked(counts: BTreeMap<String, u64>) -> Vec<CountRow> {
    let mut rows: Vec<CountRow> = counts
        .into_iter()
        .map(|(name, count)| CountRow { name, count })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    rows
}

//=========================================================================================
// Builder
//=========================================================================================

/// Builds a report over `visitors` and `events`, optionally limited to a window
/// (events by timestamp, visitors by `last_seen`).
pub fn build_report(
    visitors: &[Visitor],
    events: &[Event],
    window: Option<ReportWindow>,
    now: DateTime<Utc>,
    unit_price_cents: u64,
) -> Report {
    let mut skipped = Skipped::default();

    let mut known: BTreeMap<Uuid, &Visitor> = BTreeMap::new();
    for visitor in visitors {
        if is_malformed(visitor) {
            skipped.visitors += 1;
        } else {
            known.insert(visitor.id, visitor);
        }
    }
    let in_window: Vec<&Visitor> = known
        .values()
        .copied()
        .filter(|v| window.map_or(true, |w| w.contains(v.last_seen)))
        .collect();

    let mut facts: BTreeMap<Uuid, Facts> = in_window
        .iter()
        .copied()
        .map(|v| {
            let fact = Facts {
                page_views: v.page_views,
                windows: v.windows_opened.iter().map(String::as_str).collect(),
                chatted: v.interacted_with_sam,
                email: v.has_email(),
                counselor: v.enabled_counselor_mode,
                ..Default::default()
            };
            (v.id, fact)
        })
        .collect();

    let mut window_opens: BTreeMap<&str, u64> = BTreeMap::new();
    let mut window_openers: BTreeMap<&str, BTreeSet<Uuid>> = BTreeMap::new();
    let mut page_events: BTreeMap<Uuid, u32> = BTreeMap::new();
    let mut counted_events = 0u64;

    for event in events {
        if window.is_some_and(|w| !w.contains(event.timestamp)) {
            continue;
        }
        if !known.contains_key(&event.visitor_id) || !is_well_formed(&event.payload) {
            skipped.events += 1;
            continue;
        }
        let Some(fact) = facts.get_mut(&event.visitor_id) else {
            // Known visitor whose last_seen falls outside the window.
            continue;
        };
        counted_events += 1;

        match &event.payload {
            EventData::PageView(_) => *page_events.entry(event.visitor_id).or_default() += 1,
            EventData::WindowOpen(w) => {
                fact.windows.insert(w.window.as_str());
                *window_opens.entry(w.window.as_str()).or_default() += 1;
                window_openers
                    .entry(w.window.as_str())
                    .or_default()
                    .insert(event.visitor_id);
            }
            EventData::SamChat(_) => fact.chatted = true,
            EventData::EmailCapture(_) => fact.email = true,
            EventData::CounselorModeEnabled(_) => fact.counselor = true,
            EventData::Purchase(p) => {
                fact.purchase_events += 1;
                fact.revenue_cents = fact.revenue_cents.saturating_add(p.amount_cents);
            }
            EventData::Heartbeat(_) | EventData::Custom(_) => {}
        }
    }

    for visitor in in_window.iter().copied() {
        if let Some(fact) = facts.get_mut(&visitor.id) {
            fact.page_views = fact
                .page_views
                .max(page_events.get(&visitor.id).copied().unwrap_or(0));
            if visitor.purchased_credits && fact.purchase_events == 0 {
                fact.purchase_events = 1;
                fact.revenue_cents = unit_price_cents;
            }
            // Openers known only from the visitor record still count once.
            for name in &visitor.windows_opened {
                window_openers.entry(name.as_str()).or_default().insert(visitor.id);
            }
        }
    }

    let total = in_window.len() as u64;
    Report {
        generated_at: now,
        window,
        visitors: total,
        events: counted_events,
        traffic: traffic(&in_window),
        funnel: funnel(&facts, total),
        revenue_by_source: revenue_by_source(&in_window, &facts),
        content_performance: content_performance(&window_opens, &window_openers, &facts),
        temperature: temperature_buckets(&in_window, now),
        hot_leads: hot_leads(&in_window, now),
        cold_leads: cold_leads(&in_window, now),
        cohorts: cohorts(&in_window, &facts),
        skipped,
    }
}

fn traffic(visitors: &[&Visitor]) -> TrafficBreakdown {
    let mut by_channel = BTreeMap::new();
    let mut by_medium = BTreeMap::new();
    let mut by_source = BTreeMap::new();
    for v in visitors {
        let a = &v.attribution;
        *by_channel.entry(label(&a.traffic_channel, "direct")).or_default() += 1;
        *by_medium.entry(label(&a.traffic_medium, "none")).or_default() += 1;
        *by_source.entry(label(&a.traffic_source, "direct")).or_default() += 1;
    }
    TrafficBreakdown {
        by_channel: ranked(by_channel),
        by_medium: ranked(by_medium),
        by_source: ranked(by_source),
    }
}

fn funnel(facts: &BTreeMap<Uuid, Facts>, total: u64) -> Vec<FunnelStep> {
    let count = |pred: fn(&Facts) -> bool| facts.values().filter(|f| pred(f)).count() as u64;
    let steps: [(&'static str, u64); 6] = [
        ("visited", total),
        ("engaged", count(|f| f.engaged())),
        ("chatted", count(|f| f.chatted)),
        ("email_captured", count(|f| f.email)),
        ("counselor_mode", count(|f| f.counselor)),
        ("purchased", count(|f| f.purchased())),
    ];
    steps
        .into_iter()
        .map(|(step, count)| FunnelStep {
            step,
            count,
            rate: percent(count, total),
        })
        .collect()
}

fn revenue_by_source(visitors: &[&Visitor], facts: &BTreeMap<Uuid, Facts>) -> Vec<SourceRevenue> {
    #[derive(Default)]
    struct Tally {
        visitors: u64,
        emails: u64,
        purchasers: u64,
        revenue_cents: u64,
    }

    let mut by_source: BTreeMap<String, Tally> = BTreeMap::new();
    for v in visitors {
        let Some(fact) = facts.get(&v.id) else { continue };
        let tally = by_source
            .entry(label(&v.attribution.traffic_source, "direct"))
            .or_default();
        tally.visitors += 1;
        if fact.email {
            tally.emails += 1;
        }
        if fact.purchased() {
            tally.purchasers += 1;
            tally.revenue_cents = tally.revenue_cents.saturating_add(fact.revenue_cents);
        }
    }

    let mut rows: Vec<SourceRevenue> = by_source
        .into_iter()
        .map(|(source, t)| SourceRevenue {
            source,
            visitors: t.visitors,
            email_capture_rate: percent(t.emails, t.visitors),
            purchase_rate: percent(t.purchasers, t.visitors),
            purchasers: t.purchasers,
            revenue_cents: t.revenue_cents,
            revenue_per_visitor_cents: ratio(t.revenue_cents, t.visitors),
            ltv_cents: ratio(t.revenue_cents, t.purchasers),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.revenue_cents
            .cmp(&a.revenue_cents)
            .then_with(|| b.visitors.cmp(&a.visitors))
            .then_with(|| a.source.cmp(&b.source))
    });
    rows
}

fn content_performance(
    opens: &BTreeMap<&str, u64>,
    openers: &BTreeMap<&str, BTreeSet<Uuid>>,
    facts: &BTreeMap<Uuid, Facts>,
) -> Vec<ContentPerformance> {
    let mut rows: Vec<ContentPerformance> = openers
        .iter()
        .map(|(window, ids)| {
            let unique = ids.len() as u64;
            let opens = opens.get(window).copied().unwrap_or(0).max(unique);
            let mut emails = 0;
            let mut purchasers = 0;
            let mut revenue: u64 = 0;
            for fact in ids.iter().filter_map(|id| facts.get(id)) {
                if fact.email {
                    emails += 1;
                }
                if fact.purchased() {
                    purchasers += 1;
                    revenue = revenue.saturating_add(fact.revenue_cents);
                }
            }
            ContentPerformance {
                window: window.to_string(),
                opens,
                unique_openers: unique,
                email_capture_rate: percent(emails, unique),
                purchase_rate: percent(purchasers, unique),
                revenue_per_open_cents: ratio(revenue, opens),
            }
        })
        .collect();
    rows.sort_by(|a, b| b.opens.cmp(&a.opens).then_with(|| a.window.cmp(&b.window)));
    rows
}

fn summary(v: &Visitor, temperature: LeadTemperature) -> LeadSummary {
    LeadSummary {
        visitor_id: v.id,
        email: v.email.clone(),
        lead_score: v.lead_score,
        temperature,
        channel: label(&v.attribution.traffic_channel, "direct"),
        last_seen: v.last_seen,
    }
}

fn temperature_buckets(visitors: &[&Visitor], now: DateTime<Utc>) -> TemperatureBuckets {
    let mut buckets = TemperatureBuckets::default();
    for v in visitors {
        match lead_temperature(v.last_seen, v.lead_score, now) {
            LeadTemperature::Hot => buckets.hot += 1,
            LeadTemperature::Warm => buckets.warm += 1,
            LeadTemperature::Cold => buckets.cold += 1,
        }
    }
    buckets
}

fn hot_leads(visitors: &[&Visitor], now: DateTime<Utc>) -> Vec<LeadSummary> {
    let mut hot: Vec<LeadSummary> = visitors
        .iter()
        .filter(|v| lead_temperature(v.last_seen, v.lead_score, now) == LeadTemperature::Hot)
        .map(|v| summary(v, LeadTemperature::Hot))
        .collect();
    hot.sort_by(|a, b| {
        b.lead_score
            .cmp(&a.lead_score)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
    });
    hot
}

/// High-scoring visitors without an email who went quiet between 4 and 48 hours ago.
fn cold_leads(visitors: &[&Visitor], now: DateTime<Utc>) -> Vec<LeadSummary> {
    let mut cold: Vec<LeadSummary> = visitors
        .iter()
        .filter(|v| {
            let since = now - v.last_seen;
            v.lead_score >= COLD_WATCH_MIN_SCORE
                && !v.has_email()
                && since >= Duration::hours(4)
                && since <= Duration::hours(48)
        })
        .map(|v| summary(v, lead_temperature(v.last_seen, v.lead_score, now)))
        .collect();
    cold.sort_by(|a, b| {
        b.lead_score
            .cmp(&a.lead_score)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
    });
    cold
}

fn cohorts(visitors: &[&Visitor], facts: &BTreeMap<Uuid, Facts>) -> Vec<Cohort> {
    let mut weeks: BTreeMap<String, (u64, u64, u64)> = BTreeMap::new();
    for v in visitors {
        let week = v.first_seen.iso_week();
        let entry = weeks
            .entry(format!("{}-W{:02}", week.year(), week.week()))
            .or_default();
        entry.0 += 1;
        if let Some(fact) = facts.get(&v.id) {
            if fact.email {
                entry.1 += 1;
            }
            if fact.purchased() {
                entry.2 += 1;
            }
        }
    }
    weeks
        .into_iter()
        .map(|(week, (visitors, emails, purchased))| Cohort {
            week,
            visitors,
            email_captured: emails,
            purchased,
            conversion_rate: percent(purchased, visitors),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Attribution, PageViewData, PurchaseData, WindowOpenData};
    use chrono::TimeZone;

    fn visitor(now: DateTime<Utc>, source: &str) -> Visitor {
        let attribution = Attribution {
            traffic_source: source.to_string(),
            traffic_medium: "email".to_string(),
            traffic_channel: "email".to_string(),
            ..Default::default()
        };
        Visitor::new(Uuid::new_v4(), attribution, now - Duration::hours(1))
    }

    fn step<'a>(report: &'a Report, name: &str) -> &'a FunnelStep {
        report.funnel.iter().find(|s| s.step == name).unwrap()
    }

    #[test]
    fn funnel_rates_are_relative_to_all_visitors() {
        let now = Utc::now();
        let visitors: Vec<Visitor> = (0..100)
            .map(|i| {
                let mut v = visitor(now, "google");
                if i < 40 {
                    v.page_views = 2;
                }
                v
            })
            .collect();

        let report = build_report(&visitors, &[], None, now, DEFAULT_UNIT_PRICE_CENTS);
        assert_eq!(step(&report, "visited").count, 100);
        assert_eq!(step(&report, "engaged").count, 40);
        assert_eq!(step(&report, "engaged").rate, 40.0);
    }

    #[test]
    fn empty_input_gives_zero_rates() {
        let report = build_report(&[], &[], None, Utc::now(), DEFAULT_UNIT_PRICE_CENTS);
        assert_eq!(report.visitors, 0);
        assert!(report.funnel.iter().all(|s| s.count == 0 && s.rate == 0.0));
        assert!(report.revenue_by_source.is_empty());
    }

    #[test]
    fn revenue_by_source_values_flagged_purchases_at_unit_price() {
        let now = Utc::now();
        let visitors: Vec<Visitor> = (0..10)
            .map(|i| {
                let mut v = visitor(now, "newsletter");
                v.purchased_credits = i < 2;
                v
            })
            .collect();

        let report = build_report(&visitors, &[], None, now, DEFAULT_UNIT_PRICE_CENTS);
        let row = &report.revenue_by_source[0];
        assert_eq!(row.source, "newsletter");
        assert_eq!(row.visitors, 10);
        assert_eq!(row.purchasers, 2);
        assert_eq!(row.revenue_cents, 7400);
        assert_eq!(row.revenue_per_visitor_cents, 740.0);
        assert_eq!(row.ltv_cents, 3700.0);
        assert_eq!(row.purchase_rate, 20.0);
    }

    #[test]
    fn purchase_events_carry_their_own_amounts() {
        let now = Utc::now();
        let mut buyer = visitor(now, "google");
        buyer.purchased_credits = true;
        let events = vec![Event::new(
            buyer.id,
            None,
            EventData::Purchase(PurchaseData {
                product: "credits-100".to_string(),
                amount_cents: 9900,
                credits: Some(100),
            }),
            now - Duration::minutes(30),
        )];

        let report = build_report(&[buyer], &events, None, now, DEFAULT_UNIT_PRICE_CENTS);
        assert_eq!(report.revenue_by_source[0].revenue_cents, 9900);
        assert_eq!(report.revenue_by_source[0].ltv_cents, 9900.0);
    }

    #[test]
    fn malformed_records_are_skipped_and_counted() {
        let now = Utc::now();
        let good = visitor(now, "google");
        let mut inflated = visitor(now, "google");
        inflated.lead_score = 180;
        let mut backwards = visitor(now, "google");
        backwards.last_seen = backwards.first_seen - Duration::days(1);

        let page = |id: Uuid, path: &str| {
            Event::new(
                id,
                None,
                EventData::PageView(PageViewData {
                    path: path.to_string(),
                    title: None,
                    referrer: None,
                }),
                now - Duration::minutes(5),
            )
        };
        let events = vec![
            page(good.id, "/bible"),
            page(Uuid::new_v4(), "/orphan"),
            page(good.id, "  "),
        ];

        let report = build_report(
            &[good, inflated, backwards],
            &events,
            None,
            now,
            DEFAULT_UNIT_PRICE_CENTS,
        );
        assert_eq!(report.visitors, 1);
        assert_eq!(report.events, 1);
        assert_eq!(report.skipped, Skipped { visitors: 2, events: 2 });
    }

    #[test]
    fn content_performance_counts_opens_and_openers() {
        let now = Utc::now();
        let mut reader = visitor(now, "google");
        reader.email = Some("r@x.com".to_string());
        let browser = visitor(now, "google");
        let open = |id: Uuid| {
            Event::new(
                id,
                None,
                EventData::WindowOpen(WindowOpenData {
                    window: "bible".to_string(),
                }),
                now - Duration::minutes(10),
            )
        };
        let events = vec![open(reader.id), open(reader.id), open(browser.id)];

        let report = build_report(&[reader, browser], &events, None, now, DEFAULT_UNIT_PRICE_CENTS);
        let bible = &report.content_performance[0];
        assert_eq!(bible.window, "bible");
        assert_eq!(bible.opens, 3);
        assert_eq!(bible.unique_openers, 2);
        assert_eq!(bible.email_capture_rate, 50.0);
        assert_eq!(step(&report, "engaged").count, 2);
    }

    #[test]
    fn lead_lists_and_temperature_buckets() {
        let now = Utc::now();
        let mut hot = visitor(now, "google");
        hot.lead_score = 70;
        hot.last_seen = now - Duration::minutes(10);
        let mut warm = visitor(now, "google");
        warm.first_seen = now - Duration::hours(3);
        warm.lead_score = 45;
        warm.last_seen = now - Duration::hours(2);
        let mut slipping = visitor(now, "google");
        slipping.first_seen = now - Duration::days(3);
        slipping.lead_score = 75;
        slipping.last_seen = now - Duration::hours(30);

        let report = build_report(&[hot, warm, slipping.clone()], &[], None, now, DEFAULT_UNIT_PRICE_CENTS);
        assert_eq!(report.temperature, TemperatureBuckets { hot: 1, warm: 1, cold: 1 });
        assert_eq!(report.hot_leads.len(), 1);
        assert_eq!(report.hot_leads[0].lead_score, 70);
        assert_eq!(report.cold_leads.len(), 1);
        assert_eq!(report.cold_leads[0].visitor_id, slipping.id);
    }

    #[test]
    fn window_limits_visitors_and_events() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let mut old = visitor(now, "google");
        old.first_seen = now - Duration::days(20);
        old.last_seen = now - Duration::days(15);
        let recent = visitor(now, "bing");
        let window = ReportWindow {
            from: Some(now - Duration::days(7)),
            to: Some(now),
        };

        let report = build_report(&[old, recent], &[], Some(window), now, DEFAULT_UNIT_PRICE_CENTS);
        assert_eq!(report.visitors, 1);
        assert_eq!(report.traffic.by_source[0].name, "bing");
        assert_eq!(report.cohorts.len(), 1);
        assert_eq!(report.cohorts[0].week, "2026-W11");
    }

    #[test]
    fn oversized_purchase_amounts_saturate() {
        let now = Utc::now();
        let buyer = visitor(now, "google");
        let purchase = |at| {
            Event::new(
                buyer.id,
                None,
                EventData::Purchase(PurchaseData {
                    product: "credits-100".to_string(),
                    amount_cents: u64::MAX / 2 + 1,
                    credits: None,
                }),
                at,
            )
        };
        let events = vec![
            purchase(now - Duration::minutes(30)),
            purchase(now - Duration::minutes(20)),
        ];

        let report = build_report(&[buyer.clone()], &events, None, now, DEFAULT_UNIT_PRICE_CENTS);
        assert_eq!(report.revenue_by_source[0].revenue_cents, u64::MAX);
        assert_eq!(report.events, 2);
    }
}
