//! Minute-precision time of day.
//!
//! Static schedules express times past midnight as `25:11:00`, while the
//! live delay feed always reports wall-clock `01:11`. [`ClockTime`] folds
//! both forms onto the same 0–23 hour range so they compare directly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::matcher::ParseError;

/// A wall-clock time of day with the seconds dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    /// Builds a time from raw components, reducing `hour` modulo 24.
    ///
    /// Returns `None` when `minute` is 60 or more.
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        Some(Self {
            hour: (hour % 24) as u8,
            minute: minute as u8,
        })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Minutes since midnight.
    pub fn minutes_of_day(&self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }
}

impl FromStr for ClockTime {
    type Err = ParseError;

    /// Accepts `HH:MM` or `HH:MM:SS`. Seconds are validated and truncated.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidTime(s.to_string());

        let mut parts = s.trim().split(':');
        let hour: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let minute: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;

        if let Some(seconds) = parts.next() {
            match seconds.parse::<u32>() {
                Ok(sec) if sec < 60 => {}
                _ => return Err(invalid()),
            }
        }

        if parts.next().is_some() {
            return Err(invalid());
        }

        ClockTime::new(hour, minute).ok_or_else(invalid)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
