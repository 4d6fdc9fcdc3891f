use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone};
use chrono_tz::Europe::Warsaw;
use prost::Message;
use std::sync::Arc;
use tristar_rt::alerts::parse_alerts;
use tristar_rt::delays::{DelayBatch, DelaySource, parse_delays};
use tristar_rt::feed::build_feed;
use tristar_rt::matcher::{MatchOutcome, match_entry};
use tristar_rt::output::parse_feed;
use tristar_rt::pipeline;
use tristar_rt::schedule::{ScheduleIndex, load_stop_times};
use tristar_rt::stats::FeedSummary;
use tristar_rt::tables::IdTables;
use tristar_rt::vehicles::{VehiclePositions, parse_positions};

const STOP_TIMES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/stop_times.txt");
const TABLES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/tables.json");

/// Serves recorded delay API responses.
struct RecordedDelays;

#[async_trait]
impl DelaySource for RecordedDelays {
    async fn delays_for_stop(&self, stop_id: u32) -> Result<DelayBatch> {
        match stop_id {
            2001 => parse_delays(include_bytes!("fixtures/delays_2001.json")),
            2002 => parse_delays(include_bytes!("fixtures/delays_2002.json")),
            other => bail!("no recording for stop {other}"),
        }
    }
}

fn service_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, 12, 17).unwrap()
}

#[test]
fn test_documented_match_against_recorded_batch() {
    let batch = parse_delays(include_bytes!("fixtures/delays_2002.json")).unwrap();

    let outcome = match_entry("R3D2017-12-17T11S003-01O2", 2002, "12:17:00", &batch.delay);
    let record = outcome.record().expect("documented arrival should match");
    assert_eq!(record.delay_seconds, Some(149));
    assert_eq!(record.estimated_time.unwrap().to_string(), "12:19");

    let outcome = match_entry("R3D2017-12-17T12S003-01O2", 2002, "12:17:00", &batch.delay);
    assert_eq!(outcome, MatchOutcome::NotFound);
}

#[tokio::test]
async fn test_full_pipeline() {
    let rows = load_stop_times(STOP_TIMES).expect("Failed to read stop_times");
    let index = ScheduleIndex::build(rows, service_day());
    assert_eq!(index.malformed(), 1);

    let result = pipeline::run(Arc::new(RecordedDelays), &index, 4).await;
    let stats = &result.stats;
    assert_eq!(stats.stops_queried, 2);
    assert_eq!(stats.failed_stops, 0);
    assert_eq!(stats.entries, 4);
    assert_eq!(stats.matched, 3);
    assert_eq!(stats.not_found, 1);
    assert_eq!(stats.parse_errors, 0);
    assert_eq!(stats.malformed_rows, 1);
    assert_eq!(stats.skipped_records, 1);
    assert_eq!(stats.trips_with_updates, 2);

    let tables = IdTables::load(TABLES).unwrap();
    let now = Warsaw.with_ymd_and_hms(2017, 12, 17, 12, 16, 0).unwrap();
    let feed = build_feed(
        &result.matches,
        &tables,
        index.day(),
        &VehiclePositions::default(),
        &[],
        &now,
    );

    // Round trip through the wire format like a consumer would
    let feed = parse_feed(&feed.encode_to_vec()).expect("Failed to parse feed");
    let summary = FeedSummary::from_feed(&feed);
    assert_eq!(summary.trip_updates, 2);
    assert_eq!(summary.stop_time_updates, 3);
    assert_eq!(summary.with_route_id, 2);
    assert_eq!(summary.with_vehicle, 1);

    let night = feed.entity[0].trip_update.as_ref().unwrap();
    assert_eq!(night.trip.trip_id.as_deref(), Some("R171D2017-12-17T4S171-01O1"));
    assert_eq!(night.trip.route_id.as_deref(), Some("171_0"));
    assert_eq!(night.delay, Some(30));
    assert!(night.timestamp.is_none());

    let day = feed.entity[1].trip_update.as_ref().unwrap();
    assert_eq!(day.trip.route_id.as_deref(), Some("3_0"));
    assert_eq!(day.delay, Some(120));
    let stops: Vec<_> = day
        .stop_time_update
        .iter()
        .map(|u| u.stop_id.as_deref().unwrap())
        .collect();
    assert_eq!(stops, vec!["2001", "2002"]);

    let earliest_report = Warsaw.with_ymd_and_hms(2017, 12, 17, 12, 14, 50).unwrap();
    assert_eq!(day.timestamp, Some(earliest_report.timestamp() as u64));
}

#[test]
fn test_undecodable_record_does_not_hide_the_rest_of_the_stop() {
    let batch = parse_delays(include_bytes!("fixtures/delays_2001.json")).unwrap();
    assert_eq!(batch.skipped, 1);

    let outcome = match_entry("R3D2017-12-17T11S003-01O2", 2001, "12:15:00", &batch.delay);
    assert_eq!(outcome.record().and_then(|r| r.delay_seconds), Some(120));
}

#[tokio::test]
async fn test_feed_with_alerts_and_vehicle_positions() {
    let rows = load_stop_times(STOP_TIMES).unwrap();
    let index = ScheduleIndex::build(rows, service_day());
    let result = pipeline::run(Arc::new(RecordedDelays), &index, 4).await;

    let alerts = parse_alerts(include_bytes!("fixtures/bsk.json")).unwrap();
    let vehicles = parse_positions(include_bytes!("fixtures/gps_positions.json")).unwrap();
    assert_eq!(alerts.len(), 2);
    assert_eq!(vehicles.len(), 1);

    let tables = IdTables::load(TABLES).unwrap();
    let now = Warsaw.with_ymd_and_hms(2017, 12, 17, 12, 16, 0).unwrap();
    let feed = build_feed(&result.matches, &tables, index.day(), &vehicles, &alerts, &now);
    let feed = parse_feed(&feed.encode_to_vec()).expect("Failed to parse feed");

    let ids: Vec<_> = feed.entity.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["ALERT_0", "ALERT_1", "UPDATE_0", "UPDATE_1", "VEHICLE_1"]);

    let summary = FeedSummary::from_feed(&feed);
    assert_eq!(summary.alerts, 2);
    assert_eq!(summary.vehicle_positions, 1);
    assert_eq!(summary.trip_updates, 2);

    let detour = feed.entity[0].alert.as_ref().unwrap();
    assert_eq!(
        detour.description_text.as_ref().unwrap().translation[0].text,
        "\n\nTramwaje linii 3 kursują objazdem\nprzez ul. Grunwaldzką."
    );
    let period = &detour.active_period[0];
    let start = Warsaw.with_ymd_and_hms(2017, 12, 17, 4, 0, 0).unwrap();
    assert_eq!(period.start, Some(start.timestamp() as u64));

    let position = feed.entity[4].vehicle.as_ref().unwrap();
    let trip = position.trip.as_ref().unwrap();
    assert_eq!(trip.trip_id.as_deref(), Some("R3D2017-12-17T11S003-01O2"));
    assert_eq!(trip.route_id.as_deref(), Some("3_0"));
    assert_eq!(position.vehicle.as_ref().unwrap().id.as_deref(), Some("165"));
    assert_eq!(position.position.as_ref().unwrap().speed, Some(5.0));

    let generated = Warsaw.with_ymd_and_hms(2017, 12, 17, 12, 15, 38).unwrap();
    assert_eq!(position.timestamp, Some(generated.timestamp() as u64));
}
