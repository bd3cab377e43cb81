//! services/api/src/jobs.rs
//!
//! Background rollup: rescores visitors seen since the previous run and logs a
//! summary report for the same window.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use visitor_insight_core::ports::VisitorQuery;
use visitor_insight_core::report::ReportWindow;

use crate::error::ApiError;
use crate::web::admin::{load_report, rescore_visitor};
use crate::web::state::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupSummary {
    pub rescored: usize,
    pub changed: usize,
    pub failed: usize,
    pub visitors: u64,
    pub events: u64,
    pub hot: u64,
}

/// One rollup pass over everything seen at or after `since`.
///
/// A visitor that fails to rescore is logged and counted; the pass goes on.
pub async fn run_rollup(state: &AppState, since: DateTime<Utc>) -> Result<RollupSummary, ApiError> {
    let mut summary = RollupSummary::default();

    let recent = state
        .store
        .list_visitors(VisitorQuery {
            seen_from: Some(since),
            seen_to: None,
        })
        .await?;
    for visitor in &recent {
        match rescore_visitor(state, visitor.id).await {
            Ok(result) => {
                summary.rescored += 1;
                if result.previous_score != result.lead_score {
                    summary.changed += 1;
                }
            }
            Err(e) => {
                warn!(visitor_id = %visitor.id, error = %e, "Rescore failed");
                summary.failed += 1;
            }
        }
    }

    let report = load_report(
        state,
        Some(ReportWindow {
            from: Some(since),
            to: None,
        }),
    )
    .await?;
    summary.visitors = report.visitors;
    summary.events = report.events;
    summary.hot = report.temperature.hot;
    if report.skipped.visitors > 0 || report.skipped.events > 0 {
        warn!(
            visitors = report.skipped.visitors,
            events = report.skipped.events,
            "Rollup skipped malformed records"
        );
    }
    Ok(summary)
}

/// Runs `run_rollup` every `every` until `cancel` fires.
pub fn spawn_rollup_job(
    state: Arc<AppState>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let lookback = chrono::Duration::from_std(every).unwrap_or_else(|_| chrono::Duration::days(1));
        let mut since = Utc::now() - lookback;

        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Rollup job stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let started = Utc::now();
                    match run_rollup(&state, since).await {
                        Ok(s) => {
                            info!(
                                rescored = s.rescored,
                                changed = s.changed,
                                failed = s.failed,
                                visitors = s.visitors,
                                events = s.events,
                                hot = s.hot,
                                "Rollup complete"
                            );
                            since = started;
                        }
                        Err(e) => warn!(error = %e, "Rollup failed; window kept for the next run"),
                    }
                }
            }
        }
    })
}
