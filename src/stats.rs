use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::gtfs_rt::FeedMessage;

/// Outcome counters of one realtime build, appended to the stats CSV.
#[derive(Debug, Default, Serialize)]
pub struct RunStats {
    pub timestamp: DateTime<Utc>,
    pub service_day: Option<NaiveDate>,

    // delay feed
    pub stops_queried: usize,
    pub failed_stops: usize,
    /// Delay records dropped because they could not be decoded.
    pub skipped_records: usize,

    // schedule entries
    pub entries: usize,
    pub matched: usize,
    pub not_found: usize,
    pub parse_errors: usize,
    /// Entries at stops whose delay batch could not be fetched.
    pub unavailable: usize,
    /// `stop_times.txt` rows with an undecodable `trip_id`, not part of `entries`.
    pub malformed_rows: usize,

    pub trips_with_updates: usize,
    pub vehicle_positions: usize,
    pub alerts: usize,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl RunStats {
    pub fn for_day(service_day: NaiveDate) -> Self {
        RunStats {
            timestamp: Utc::now(),
            service_day: Some(service_day),
            ..Default::default()
        }
    }

    /// Create an error record for a run that could not complete
    pub fn from_error(error_type: &str, error_message: &str) -> Self {
        RunStats {
            timestamp: Utc::now(),
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        }
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    /// Share of schedule entries that found a delay record.
    pub fn match_pct(&self) -> f64 {
        Self::pct(self.matched, self.entries)
    }
}

/// Field coverage of a produced feed, used when inspecting output files.
#[derive(Debug, Default, Serialize)]
pub struct FeedSummary {
    pub timestamp: Option<u64>,
    pub total_entities: usize,
    pub trip_updates: usize,
    pub stop_time_updates: usize,
    pub vehicle_positions: usize,
    pub alerts: usize,

    pub with_route_id: usize,
    pub with_start_date: usize,
    pub with_vehicle: usize,
    pub with_timestamp: usize,
    pub with_delay: usize,
}

impl FeedSummary {
    pub fn from_feed(feed: &FeedMessage) -> Self {
        let mut s = FeedSummary {
            timestamp: feed.header.timestamp,
            total_entities: feed.entity.len(),
            ..Default::default()
        };

        for e in &feed.entity {
            if e.vehicle.is_some() {
                s.vehicle_positions += 1;
            }
            if e.alert.is_some() {
                s.alerts += 1;
            }

            let Some(tu) = &e.trip_update else {
                continue;
            };
            s.trip_updates += 1;
            s.stop_time_updates += tu.stop_time_update.len();

            if tu.trip.route_id.is_some() {
                s.with_route_id += 1;
            }

            if tu.trip.start_date.is_some() {
                s.with_start_date += 1;
            }

            if tu.vehicle.is_some() {
                s.with_vehicle += 1;
            }

            if tu.timestamp.is_some() {
                s.with_timestamp += 1;
            }

            if tu.delay.is_some() {
                s.with_delay += 1;
            }
        }

        s
    }
}
