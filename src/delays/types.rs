//! Wire types of the ZTM Gdańsk per-stop delay feed.

use serde::{Deserialize, Deserializer};

use crate::clock::ClockTime;

/// Decoded response of `GET /delays?stopId=<id>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelayBatch {
    pub last_update: Option<String>,
    pub delay: Vec<DelayRecord>,
    /// Records in the response that could not be decoded and were dropped.
    pub skipped: usize,
}

/// Response body as sent; records are decoded one at a time afterwards.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawBatch {
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub delay: Vec<serde_json::Value>,
}

/// One predicted arrival at a stop.
///
/// Records carry no identity of their own; `(route_id, trip_id,
/// theoretical_time)` is what links them to the schedule.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayRecord {
    pub route_id: u32,
    pub trip_id: u32,
    pub theoretical_time: ClockTime,
    #[serde(default, deserialize_with = "optional_clock")]
    pub estimated_time: Option<ClockTime>,
    /// Negative when the vehicle runs early. Absent for records without a prediction.
    #[serde(rename = "delayInSeconds", default)]
    pub delay_seconds: Option<i32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(alias = "vehicleCode", default, deserialize_with = "string_or_number")]
    pub vehicle_label: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub vehicle_id: Option<String>,
    /// Local `HH:MM:SS` of the vehicle's last report.
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
    Float(f64),
}

// Vehicle identifiers show up both as JSON numbers and as strings.
pub(crate) fn string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(
        Option::<StringOrNumber>::deserialize(deserializer)?.map(|value| match value {
            StringOrNumber::Str(s) => s,
            StringOrNumber::Int(i) => i.to_string(),
            StringOrNumber::Float(f) => f.to_string(),
        }),
    )
}

// An empty string means the feed has no estimate yet.
fn optional_clock<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<ClockTime>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => raw.parse().map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
