use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use super::ParseError;
use crate::clock::ClockTime;

// The date segment is lazy so the first `T<digits>S` closes it; the service
// name is greedy so only the last `O<digits>` is taken as the order.
static TRIP_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^R(\d+)D(.+?)T(\d+)S(.*)O(\d+)$").expect("trip id pattern is valid")
});

/// A decoded static feed trip identifier, `R<route>D<date>T<trip>S<service>O<order>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripIdentifier {
    pub route_id: u32,
    /// Service date exactly as embedded, normally `YYYY-MM-DD`.
    pub date: String,
    pub trip_id: u32,
    pub bus_service_name: String,
    pub order: u32,
}

impl FromStr for TripIdentifier {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = TRIP_ID_PATTERN
            .captures(s)
            .ok_or_else(|| ParseError::MalformedTripId(s.to_string()))?;

        let number = |idx: usize, segment: &'static str| {
            caps[idx]
                .parse::<u32>()
                .map_err(|_| ParseError::InvalidNumber {
                    segment,
                    trip_id: s.to_string(),
                })
        };

        Ok(TripIdentifier {
            route_id: number(1, "R")?,
            date: caps[2].to_string(),
            trip_id: number(3, "T")?,
            bus_service_name: caps[4].to_string(),
            order: number(5, "O")?,
        })
    }
}

/// Composite key identifying one scheduled arrival in the delay feed's terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleKey {
    pub original_route_id: u32,
    pub original_trip_id: u32,
    pub original_stop_id: u32,
    pub arrival_time: ClockTime,
}

impl ScheduleKey {
    pub fn from_parts(trip: &TripIdentifier, original_stop_id: u32, arrival_time: ClockTime) -> Self {
        ScheduleKey {
            original_route_id: trip.route_id,
            original_trip_id: trip.trip_id,
            original_stop_id,
            arrival_time,
        }
    }
}

/// Derives the key for a static stop time.
///
/// `arrival_time` is the raw GTFS value and may carry hours of 24 or more.
pub fn derive_schedule_key(
    trip_identifier: &str,
    original_stop_id: u32,
    arrival_time: &str,
) -> Result<ScheduleKey, ParseError> {
    let trip: TripIdentifier = trip_identifier.parse()?;
    let arrival_time: ClockTime = arrival_time.parse()?;
    Ok(ScheduleKey::from_parts(&trip, original_stop_id, arrival_time))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_documented_example() {
        let key = derive_schedule_key("R3D2017-12-17T11S003-01O2", 2002, "12:17:00").unwrap();

        assert_eq!(key.original_route_id, 3);
        assert_eq!(key.original_trip_id, 11);
        assert_eq!(key.original_stop_id, 2002);
        assert_eq!(key.arrival_time.to_string(), "12:17");
    }

    #[test]
    fn test_route_and_trip_independent_of_other_segments() {
        let dates = ["2017-12-17", "2024-01-01", "x"];
        let services = ["003-01", "", "SO", "ORDER"];
        let orders = [0u32, 2, 991];

        for date in dates {
            for service in services {
                for order in orders {
                    let raw = format!("R10421D{date}T7S{service}O{order}");
                    let trip: TripIdentifier = raw.parse().unwrap();
                    assert_eq!(trip.route_id, 10421, "{raw}");
                    assert_eq!(trip.trip_id, 7, "{raw}");
                    assert_eq!(trip.date, date, "{raw}");
                    assert_eq!(trip.bus_service_name, service, "{raw}");
                    assert_eq!(trip.order, order, "{raw}");
                }
            }
        }
    }

    #[test]
    fn test_missing_order_suffix_fails() {
        let err = derive_schedule_key("R3D2017-12-17T11S003-01", 2002, "12:17:00").unwrap_err();
        assert!(matches!(err, ParseError::MalformedTripId(_)));
    }

    #[test]
    fn test_non_numeric_segments_fail() {
        for bad in [
            "RxD2017-12-17T11S003-01O2",
            "R3D2017-12-17TabS003-01O2",
            "R3D2017-12-17T11S003-01Ox",
            "3D2017-12-17T11S003-01O2",
            "",
        ] {
            assert!(bad.parse::<TripIdentifier>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_overflowing_segment_is_invalid_number() {
        let err = "R99999999999D2017-12-17T11S003-01O2"
            .parse::<TripIdentifier>()
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidNumber { segment: "R", .. }));
    }

    #[test]
    fn test_bad_arrival_time_fails() {
        let err = derive_schedule_key("R3D2017-12-17T11S003-01O2", 2002, "noon").unwrap_err();
        assert!(matches!(err, ParseError::InvalidTime(_)));
    }

    #[test]
    fn test_past_midnight_arrival_normalized() {
        let key = derive_schedule_key("R3D2017-12-17T11S003-01O2", 2002, "25:11:00").unwrap();
        assert_eq!(key.arrival_time.to_string(), "01:11");
    }
}
