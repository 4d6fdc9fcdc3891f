//! One realtime build: fetch every stop's delays, match every schedule entry.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, warn};

use crate::alerts::{AlertSource, ServiceAlert};
use crate::delays::{DelayRecord, DelaySource};
use crate::matcher::{MatchOutcome, match_entry};
use crate::schedule::{ScheduleIndex, StopTimeRow};
use crate::stats::RunStats;
use crate::vehicles::{VehiclePositions, VehicleSource};

/// A static stop time paired with the delay record describing it.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedStopTime {
    pub stop_time: StopTimeRow,
    pub record: DelayRecord,
}

#[derive(Debug)]
pub struct RunResult {
    pub stats: RunStats,
    pub matches: Vec<MatchedStopTime>,
}

/// Queries `source` for every stop in `index` and matches the stop times.
///
/// At most `concurrency` requests are in flight. A stop whose batch cannot
/// be fetched is logged and counted, never fatal.
#[tracing::instrument(skip(source, index), fields(day = %index.day()))]
pub async fn run<S: DelaySource + 'static>(
    source: Arc<S>,
    index: &ScheduleIndex,
    concurrency: usize,
) -> RunResult {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = vec![];

    for stop_id in index.stop_ids() {
        let sem = semaphore.clone();
        let source = source.clone();
        let span = tracing::debug_span!("fetch_stop", stop_id);

        let task = tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await?;
                source.delays_for_stop(stop_id).await
            }
            .instrument(span),
        );
        tasks.push((stop_id, task));
    }

    let mut stats = RunStats::for_day(index.day());
    stats.stops_queried = tasks.len();
    stats.malformed_rows = index.malformed();

    let mut matches = Vec::new();

    for (stop_id, task) in tasks {
        let entries = index.entries_at(stop_id);
        stats.entries += entries.len();

        let batch = match task.await {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => {
                warn!(stop_id, error = ?e, "Delay fetch failed");
                stats.failed_stops += 1;
                stats.unavailable += entries.len();
                continue;
            }
            Err(e) => {
                error!(stop_id, error = %e, "Delay fetch task aborted");
                stats.failed_stops += 1;
                stats.unavailable += entries.len();
                continue;
            }
        };
        stats.skipped_records += batch.skipped;

        for row in entries {
            match match_entry(&row.trip_id, row.original_stop_id, &row.arrival_time, &batch.delay) {
                MatchOutcome::Matched(record) => {
                    stats.matched += 1;
                    matches.push(MatchedStopTime {
                        stop_time: row.clone(),
                        record: record.clone(),
                    });
                }
                MatchOutcome::NotFound => stats.not_found += 1,
                MatchOutcome::ParseError(e) => {
                    stats.parse_errors += 1;
                    debug!(stop_id, trip_id = %row.trip_id, error = %e, "No realtime key for stop time");
                }
            }
        }
    }

    stats.trips_with_updates = matches
        .iter()
        .map(|m| m.stop_time.trip_id.as_str())
        .collect::<HashSet<_>>()
        .len();

    info!(
        stops = stats.stops_queried,
        failed_stops = stats.failed_stops,
        entries = stats.entries,
        matched = stats.matched,
        not_found = stats.not_found,
        parse_errors = stats.parse_errors,
        malformed_rows = stats.malformed_rows,
        trips = stats.trips_with_updates,
        "Realtime matching finished"
    );

    RunResult { stats, matches }
}

/// Current service alerts; a failed fetch is logged and yields none.
pub async fn collect_alerts<A: AlertSource + ?Sized>(source: &A) -> Vec<ServiceAlert> {
    match source.current_alerts().await {
        Ok(alerts) => alerts,
        Err(e) => {
            warn!(error = ?e, "Alerts unavailable, publishing without them");
            Vec::new()
        }
    }
}

/// Current vehicle positions; a failed fetch is logged and yields none.
pub async fn collect_positions<V: VehicleSource + ?Sized>(source: &V) -> VehiclePositions {
    match source.vehicle_positions().await {
        Ok(positions) => positions,
        Err(e) => {
            warn!(error = ?e, "Vehicle positions unavailable, publishing without them");
            VehiclePositions::default()
        }
    }
}
