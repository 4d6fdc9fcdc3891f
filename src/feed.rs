//! GTFS-Realtime encoding of matched stop times, vehicle positions and alerts.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone};
use std::collections::BTreeMap;

use crate::alerts::ServiceAlert;
use crate::gtfs_rt::{
    Alert, FeedEntity, FeedHeader, FeedMessage, Position, TimeRange, TranslatedString,
    TripDescriptor, TripUpdate, VehicleDescriptor, VehiclePosition, feed_header,
    translated_string, trip_descriptor, trip_update,
};
use crate::pipeline::MatchedStopTime;
use crate::tables::IdTables;
use crate::vehicles::{VehiclePositions, VehicleReport};

pub const GTFS_REALTIME_VERSION: &str = "2.0";

/// How far in the future a vehicle report may be before it is taken to be
/// from the previous day.
const REPORT_CLOCK_SKEW_MINUTES: i64 = 2;

/// Turns a local `HH:MM:SS` report time into a POSIX timestamp relative to `now`.
///
/// The delay feed reports clock times only. The report is placed on `now`'s
/// date unless that lands more than two minutes ahead of `now`, in which
/// case it happened yesterday.
pub fn resolve_report_time<Tz: TimeZone>(raw: &str, now: &DateTime<Tz>) -> Option<i64> {
    let time = NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S").ok()?;
    let tz = now.timezone();

    let today = tz
        .from_local_datetime(&now.date_naive().and_time(time))
        .earliest()?;

    if today > now.clone() + Duration::minutes(REPORT_CLOCK_SKEW_MINUTES) {
        let yesterday = now.date_naive() - Duration::days(1);
        tz.from_local_datetime(&yesterday.and_time(time))
            .earliest()
            .map(|dt| dt.timestamp())
    } else {
        Some(today.timestamp())
    }
}

/// Builds a full-dataset feed.
///
/// Alerts come first as `ALERT_<n>`. Each matched trip then gets an
/// `UPDATE_<n>` entity, followed by `VEHICLE_<n>` when its vehicle has a
/// current position. Stop updates are ordered by `stop_sequence`; the trip's
/// own delay is the first one known along it. `service_day` fills
/// `start_date` and the table lookups.
pub fn build_feed<Tz: TimeZone>(
    matches: &[MatchedStopTime],
    tables: &IdTables,
    service_day: NaiveDate,
    vehicles: &VehiclePositions,
    alerts: &[ServiceAlert],
    now: &DateTime<Tz>,
) -> FeedMessage {
    let day = service_day.format("%Y-%m-%d").to_string();
    let start_date = service_day.format("%Y%m%d").to_string();

    let mut by_trip: BTreeMap<&str, Vec<&MatchedStopTime>> = BTreeMap::new();
    for m in matches {
        by_trip.entry(m.stop_time.trip_id.as_str()).or_default().push(m);
    }

    let mut entity: Vec<FeedEntity> = alerts
        .iter()
        .enumerate()
        .map(|(idx, alert)| alert_entity(idx, alert))
        .collect();

    for (idx, (trip_id, mut stops)) in by_trip.into_iter().enumerate() {
        stops.sort_by_key(|m| m.stop_time.stop_sequence);

        let trip = TripDescriptor {
            trip_id: Some(trip_id.to_string()),
            route_id: tables
                .route_id(&day, stops[0].record.route_id)
                .map(str::to_string),
            start_date: Some(start_date.clone()),
            schedule_relationship: Some(trip_descriptor::ScheduleRelationship::Scheduled as i32),
            ..Default::default()
        };

        let vehicle = stops
            .iter()
            .find(|m| m.record.vehicle_id.is_some() || m.record.vehicle_label.is_some())
            .map(|m| VehicleDescriptor {
                id: m.record.vehicle_id.clone(),
                label: m.record.vehicle_label.clone(),
                license_plate: None,
            });

        let timestamp = stops
            .iter()
            .filter_map(|m| m.record.timestamp.as_deref())
            .filter_map(|raw| resolve_report_time(raw, now))
            .min()
            .map(|ts| ts as u64);

        let position = vehicle
            .as_ref()
            .and_then(|v| v.id.as_deref())
            .and_then(|id| vehicles.get(id).map(|report| (id, report)))
            .map(|(id, report)| vehicle_entity(idx, &trip, id, report));

        entity.push(FeedEntity {
            id: format!("UPDATE_{idx}"),
            trip_update: Some(TripUpdate {
                trip,
                vehicle,
                stop_time_update: stops
                    .iter()
                    .map(|m| stop_time_update(m, tables, &day))
                    .collect(),
                timestamp,
                delay: stops.iter().find_map(|m| m.record.delay_seconds),
            }),
            ..Default::default()
        });
        entity.extend(position);
    }

    FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: GTFS_REALTIME_VERSION.to_string(),
            incrementality: Some(feed_header::Incrementality::FullDataset as i32),
            timestamp: Some(now.timestamp() as u64),
            feed_version: None,
        },
        entity,
    }
}

fn stop_time_update(m: &MatchedStopTime, tables: &IdTables, day: &str) -> trip_update::StopTimeUpdate {
    use trip_update::stop_time_update::ScheduleRelationship;

    let original = m.stop_time.original_stop_id;
    let stop_id = m
        .stop_time
        .stop_id
        .clone()
        .or_else(|| tables.stop_id(day, original).map(str::to_string))
        .unwrap_or_else(|| original.to_string());

    let relationship = match m.record.delay_seconds {
        Some(_) => ScheduleRelationship::Scheduled,
        None => ScheduleRelationship::NoData,
    };

    trip_update::StopTimeUpdate {
        stop_sequence: Some(m.stop_time.stop_sequence),
        stop_id: Some(stop_id),
        arrival: m.record.delay_seconds.map(|delay| trip_update::StopTimeEvent {
            delay: Some(delay),
            time: None,
            uncertainty: None,
        }),
        departure: None,
        schedule_relationship: Some(relationship as i32),
    }
}

fn vehicle_entity(idx: usize, trip: &TripDescriptor, vehicle_id: &str, report: &VehicleReport) -> FeedEntity {
    FeedEntity {
        id: format!("VEHICLE_{idx}"),
        vehicle: Some(VehiclePosition {
            trip: Some(trip.clone()),
            vehicle: Some(VehicleDescriptor {
                id: Some(vehicle_id.to_string()),
                label: report.code.clone(),
                license_plate: None,
            }),
            position: Some(Position {
                latitude: report.latitude,
                longitude: report.longitude,
                speed: Some(report.speed),
                ..Default::default()
            }),
            timestamp: report.timestamp.and_then(|ts| u64::try_from(ts).ok()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn alert_entity(idx: usize, alert: &ServiceAlert) -> FeedEntity {
    let active_period = if alert.start.is_some() || alert.end.is_some() {
        vec![TimeRange {
            start: alert.start.and_then(|ts| u64::try_from(ts).ok()),
            end: alert.end.and_then(|ts| u64::try_from(ts).ok()),
        }]
    } else {
        Vec::new()
    };

    FeedEntity {
        id: format!("ALERT_{idx}"),
        alert: Some(Alert {
            active_period,
            header_text: Some(translated(&alert.header)),
            description_text: Some(translated(&alert.description)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn translated(text: &str) -> TranslatedString {
    TranslatedString {
        translation: vec![translated_string::Translation {
            text: text.to_string(),
            language: None,
        }],
    }
}
