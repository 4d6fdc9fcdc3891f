use tracing::warn;

use super::{ParseError, ScheduleKey, derive_schedule_key};
use crate::delays::DelayRecord;

/// Result of matching one schedule entry against a stop's delay batch.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome<'a> {
    Matched(&'a DelayRecord),
    /// No realtime data is available for this arrival.
    NotFound,
    /// The entry's identifier could not be decoded, so no match was attempted.
    ParseError(ParseError),
}

impl<'a> MatchOutcome<'a> {
    pub fn record(&self) -> Option<&'a DelayRecord> {
        match self {
            MatchOutcome::Matched(record) => Some(record),
            _ => None,
        }
    }
}

fn is_same_arrival(key: &ScheduleKey, candidate: &DelayRecord) -> bool {
    candidate.route_id == key.original_route_id
        && candidate.trip_id == key.original_trip_id
        && candidate.theoretical_time == key.arrival_time
}

/// Returns the first candidate describing the same arrival as `key`.
///
/// Further candidates with the same identity are an upstream anomaly; they
/// are logged and ignored.
pub fn find_match<'a>(key: &ScheduleKey, candidates: &'a [DelayRecord]) -> Option<&'a DelayRecord> {
    let mut matches = candidates.iter().filter(|c| is_same_arrival(key, c));
    let first = matches.next()?;

    let extra = matches.count();
    if extra > 0 {
        warn!(
            stop_id = key.original_stop_id,
            route_id = key.original_route_id,
            trip_id = key.original_trip_id,
            theoretical_time = %key.arrival_time,
            duplicates = extra,
            "Ambiguous delay records for one arrival, using the first"
        );
    }

    Some(first)
}

/// Derives the key for a static stop time and looks it up in `candidates`.
pub fn match_entry<'a>(
    trip_identifier: &str,
    original_stop_id: u32,
    arrival_time: &str,
    candidates: &'a [DelayRecord],
) -> MatchOutcome<'a> {
    match derive_schedule_key(trip_identifier, original_stop_id, arrival_time) {
        Ok(key) => match find_match(&key, candidates) {
            Some(record) => MatchOutcome::Matched(record),
            None => MatchOutcome::NotFound,
        },
        Err(e) => MatchOutcome::ParseError(e),
    }
}
