//! Live per-stop delay data.

mod client;
mod types;

pub use client::{DEFAULT_BASE_URL, DelayFeedClient, DelaySource, parse_delays};
pub use types::{DelayBatch, DelayRecord};
pub(crate) use types::string_or_number;
