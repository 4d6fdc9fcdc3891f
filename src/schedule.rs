//! Reader for the static feed's `stop_times.txt`.
//!
//! Only the columns needed for realtime matching are read. Rows are
//! narrowed to a single service day and grouped by the agency's original
//! stop number, which is what the delay feed is queried by.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::matcher::TripIdentifier;

/// Service days roll over at this local hour, so night routes stay on the
/// previous day's schedule.
pub const SERVICE_DAY_START_HOUR: u32 = 4;

/// One row of `stop_times.txt`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StopTimeRow {
    pub trip_id: String,
    /// Raw GTFS time, may exceed `24:00:00`.
    pub arrival_time: String,
    #[serde(default)]
    pub stop_id: Option<String>,
    pub original_stop_id: u32,
    pub stop_sequence: u32,
}

/// Reads every well-formed row of a `stop_times.txt` file.
///
/// Rows that do not deserialize are skipped and counted in the log.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_stop_times(path: impl AsRef<Path>) -> Result<Vec<StopTimeRow>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for record in reader.deserialize::<StopTimeRow>() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => {
                skipped += 1;
                debug!(error = %e, "Skipping unreadable stop_times row");
            }
        }
    }

    if skipped > 0 {
        warn!(skipped, "Some stop_times rows could not be read");
    }
    info!(rows = rows.len(), "Loaded stop_times");

    Ok(rows)
}

/// The schedule day in effect at `now`, in the timezone `now` carries.
pub fn service_day<Tz: TimeZone>(now: &DateTime<Tz>) -> NaiveDate {
    let date = now.date_naive();
    if now.hour() < SERVICE_DAY_START_HOUR {
        date - Duration::days(1)
    } else {
        date
    }
}

/// Stop times of one service day, grouped by original stop number.
#[derive(Debug)]
pub struct ScheduleIndex {
    day: NaiveDate,
    by_stop: BTreeMap<u32, Vec<StopTimeRow>>,
    malformed: usize,
}

impl ScheduleIndex {
    pub fn build(rows: impl IntoIterator<Item = StopTimeRow>, day: NaiveDate) -> Self {
        let day_str = day.format("%Y-%m-%d").to_string();
        let mut index = ScheduleIndex {
            day,
            by_stop: BTreeMap::new(),
            malformed: 0,
        };

        for row in rows {
            match row.trip_id.parse::<TripIdentifier>() {
                Ok(trip) if trip.date == day_str => {
                    index.by_stop.entry(row.original_stop_id).or_default().push(row);
                }
                Ok(_) => {}
                Err(e) => {
                    index.malformed += 1;
                    debug!(error = %e, "No realtime key for stop time");
                }
            }
        }

        info!(
            day = %day,
            stops = index.by_stop.len(),
            entries = index.entry_count(),
            malformed = index.malformed,
            "Schedule index built"
        );
        index
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn stop_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_stop.keys().copied()
    }

    pub fn entries_at(&self, original_stop_id: u32) -> &[StopTimeRow] {
        self.by_stop
            .get(&original_stop_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[StopTimeRow])> {
        self.by_stop.iter().map(|(stop, rows)| (*stop, rows.as_slice()))
    }

    pub fn entry_count(&self) -> usize {
        self.by_stop.values().map(Vec::len).sum()
    }

    /// Rows whose `trip_id` could not be decoded.
    pub fn malformed(&self) -> usize {
        self.malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Warsaw;

    fn row(trip_id: &str, stop: u32, seq: u32) -> StopTimeRow {
        StopTimeRow {
            trip_id: trip_id.to_string(),
            arrival_time: "12:17:00".to_string(),
            stop_id: None,
            original_stop_id: stop,
            stop_sequence: seq,
        }
    }

    #[test]
    fn test_service_day_before_rollover_is_previous_day() {
        let night = Warsaw.with_ymd_and_hms(2017, 12, 18, 3, 59, 0).unwrap();
        assert_eq!(service_day(&night), NaiveDate::from_ymd_opt(2017, 12, 17).unwrap());

        let morning = Warsaw.with_ymd_and_hms(2017, 12, 18, 4, 0, 0).unwrap();
        assert_eq!(service_day(&morning), NaiveDate::from_ymd_opt(2017, 12, 18).unwrap());
    }

    #[test]
    fn test_index_keeps_only_the_service_day() {
        let day = NaiveDate::from_ymd_opt(2017, 12, 17).unwrap();
        let index = ScheduleIndex::build(
            vec![
                row("R3D2017-12-17T11S003-01O2", 2002, 1),
                row("R3D2017-12-17T11S003-01O2", 2003, 2),
                row("R3D2017-12-18T11S003-01O2", 2002, 1),
                row("garbage", 2002, 1),
            ],
            day,
        );

        assert_eq!(index.day(), day);
        assert_eq!(index.entry_count(), 2);
        assert_eq!(index.malformed(), 1);
        assert_eq!(index.stop_ids().collect::<Vec<_>>(), vec![2002, 2003]);
        assert_eq!(index.entries_at(2002).len(), 1);
        assert!(index.entries_at(9999).is_empty());
    }

    #[test]
    fn test_load_stop_times_reads_required_columns() {
        let path = std::env::temp_dir().join("tristar_rt_test_stop_times.txt");
        std::fs::write(
            &path,
            "trip_id,arrival_time,departure_time,stop_id,original_stop_id,stop_sequence,pickup_type,drop_off_type\n\
             R3D2017-12-17T11S003-01O2,12:17:00,12:17:00,2002_1,2002,4,0,0\n\
             R3D2017-12-17T11S003-01O2,12:19:00,12:19:00,,2003,5,0,0\n\
             R3D2017-12-17T11S003-01O2,12:21:00,12:21:00,2004,,6,0,0\n",
        )
        .unwrap();

        let rows = load_stop_times(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].stop_id.as_deref(), Some("2002_1"));
        assert_eq!(rows[0].stop_sequence, 4);
        assert_eq!(rows[1].stop_id, None);
        assert_eq!(rows[1].original_stop_id, 2003);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(load_stop_times("/nonexistent/stop_times.txt").is_err());
    }
}
