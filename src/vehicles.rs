//! Live GPS positions from the `gpsPositions` endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone};
use chrono_tz::Europe::Warsaw;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::delays::string_or_number;
use crate::fetch::{HttpClient, decode_each, fetch_bytes_retrying};

/// Only fixes of this quality are published.
const GOOD_GPS_QUALITY: i64 = 3;

/// Position of one vehicle, keyed in [`VehiclePositions`] by vehicle id.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleReport {
    pub code: Option<String>,
    pub latitude: f32,
    pub longitude: f32,
    /// Meters per second.
    pub speed: f32,
    pub timestamp: Option<i64>,
}

/// Current positions of in-service vehicles with a good GPS fix.
#[derive(Debug, Clone, Default)]
pub struct VehiclePositions {
    by_id: HashMap<String, VehicleReport>,
}

impl VehiclePositions {
    pub fn get(&self, vehicle_id: &str) -> Option<&VehicleReport> {
        self.by_id.get(vehicle_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl FromIterator<(String, VehicleReport)> for VehiclePositions {
    fn from_iter<I: IntoIterator<Item = (String, VehicleReport)>>(iter: I) -> Self {
        Self {
            by_id: iter.into_iter().collect(),
        }
    }
}

#[derive(Deserialize)]
struct RawPositions {
    #[serde(rename = "Vehicles", default)]
    vehicles: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawVehicle {
    #[serde(default, deserialize_with = "string_or_number")]
    line: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    vehicle_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    vehicle_code: Option<String>,
    #[serde(default)]
    data_generated: Option<String>,
    #[serde(default)]
    speed: Option<f64>,
    lat: f64,
    lon: f64,
    #[serde(rename = "GPSQuality", default)]
    gps_quality: Option<i64>,
}

impl RawVehicle {
    fn into_report(self) -> Option<(String, VehicleReport)> {
        let in_service = self.line.as_deref().is_some_and(|l| !l.trim().is_empty());
        if !in_service || self.gps_quality != Some(GOOD_GPS_QUALITY) {
            return None;
        }

        let report = VehicleReport {
            code: self.vehicle_code,
            latitude: self.lat as f32,
            longitude: self.lon as f32,
            speed: (self.speed.unwrap_or(0.0) / 3.6) as f32,
            timestamp: self.data_generated.as_deref().and_then(local_timestamp),
        };
        Some((self.vehicle_id?, report))
    }
}

fn local_timestamp(raw: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
    Warsaw
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

/// Decodes a `gpsPositions` body, keeping vehicles on a line with a good fix.
pub fn parse_positions(bytes: &[u8]) -> Result<VehiclePositions> {
    let raw: RawPositions = serde_json::from_slice(bytes).context("malformed GPS positions response")?;
    let (vehicles, _) = decode_each::<RawVehicle>(raw.vehicles.unwrap_or_default(), "vehicle");

    let total = vehicles.len();
    let positions: VehiclePositions = vehicles.into_iter().filter_map(RawVehicle::into_report).collect();
    debug!(total, kept = positions.len(), "GPS positions decoded");

    Ok(positions)
}

#[async_trait]
pub trait VehicleSource: Send + Sync {
    async fn vehicle_positions(&self) -> Result<VehiclePositions>;
}

/// [`VehicleSource`] backed by `{base_url}/gpsPositions`.
pub struct VehicleFeedClient<C> {
    client: C,
    url: String,
    attempts: u32,
    backoff: Duration,
}

impl<C: HttpClient> VehicleFeedClient<C> {
    pub fn new(client: C, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/gpsPositions", base_url.trim_end_matches('/')),
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts;
        self.backoff = backoff;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl<C: HttpClient> VehicleSource for VehicleFeedClient<C> {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn vehicle_positions(&self) -> Result<VehiclePositions> {
        let bytes = fetch_bytes_retrying(&self.client, &self.url, self.attempts, self.backoff)
            .await
            .context("fetching GPS positions")?;
        parse_positions(&bytes)
    }
}
