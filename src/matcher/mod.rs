//! Static-to-realtime matching.
//!
//! A static stop time is linked to a live delay record through the
//! agency's original route and trip numbers (decoded from the generated
//! `trip_id`) plus the scheduled time at the stop. Both failure modes,
//! an undecodable identifier and a missing record, are ordinary outcomes
//! reported through [`MatchOutcome`].

mod error;
mod find;
mod key;

pub use error::ParseError;
pub use find::{MatchOutcome, find_match, match_entry};
pub use key::{ScheduleKey, TripIdentifier, derive_schedule_key};
