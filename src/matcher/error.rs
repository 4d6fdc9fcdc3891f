use thiserror::Error;

/// Why a static schedule entry could not be turned into a [`ScheduleKey`].
///
/// Always recoverable: the entry simply has no realtime data.
///
/// [`ScheduleKey`]: super::ScheduleKey
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("trip identifier {0:?} does not match R<route>D<date>T<trip>S<service>O<order>")]
    MalformedTripId(String),
    #[error("segment {segment} of trip identifier {trip_id:?} is not a valid integer")]
    InvalidNumber {
        segment: &'static str,
        trip_id: String,
    },
    #[error("invalid time of day: {0:?}")]
    InvalidTime(String),
}
