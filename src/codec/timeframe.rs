//! Timeframes
//!
//! A timeframe is the interval width of a bucket file, written in the key
//! as `{count}{unit}` (`1Sec`, `5Min`, `1H`, `1D`). Sub-second timeframes
//! are not supported.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, StoreError};

const SECOND: u64 = 1;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const YEAR: u64 = 365 * DAY;

/// Longest suffixes first so `Sec` wins over `S`
const UNITS: &[(&str, u64)] = &[
    ("Sec", SECOND),
    ("Min", MINUTE),
    ("S", SECOND),
    ("T", MINUTE),
    ("H", HOUR),
    ("D", DAY),
    ("W", WEEK),
    ("Y", YEAR),
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Timeframe {
    text: String,
    secs: u64,
}

impl Timeframe {
    /// Parse a timeframe string such as `1Min`
    pub fn parse(text: &str) -> Result<Self> {
        let digits_end = text
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| StoreError::InvalidKey(format!("timeframe without unit: {}", text)))?;
        let (count, unit) = text.split_at(digits_end);
        let count: u64 = count
            .parse()
            .map_err(|_| StoreError::InvalidKey(format!("timeframe without count: {}", text)))?;
        if count == 0 {
            return Err(StoreError::InvalidKey(format!("zero timeframe: {}", text)));
        }
        let per_unit = UNITS
            .iter()
            .find(|(suffix, _)| *suffix == unit)
            .map(|(_, secs)| *secs)
            .ok_or_else(|| StoreError::InvalidKey(format!("unknown timeframe unit: {}", text)))?;

        Ok(Self {
            text: text.to_string(),
            secs: count * per_unit,
        })
    }

    /// Build a timeframe from a duration, naming it with the largest unit
    /// that divides it evenly
    pub fn from_duration(duration: Duration) -> Result<Self> {
        if duration.subsec_nanos() != 0 || duration.as_secs() == 0 {
            return Err(StoreError::InvalidKey(format!(
                "timeframe must be a whole number of seconds: {:?}",
                duration
            )));
        }
        let secs = duration.as_secs();
        let (unit, per_unit) = [("D", DAY), ("H", HOUR), ("Min", MINUTE), ("Sec", SECOND)]
            .into_iter()
            .find(|(_, per_unit)| secs % per_unit == 0)
            .unwrap_or(("Sec", SECOND));

        Ok(Self {
            text: format!("{}{}", secs / per_unit, unit),
            secs,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.secs)
    }

    pub fn as_secs(&self) -> i64 {
        self.secs as i64
    }

    pub fn as_nanos(&self) -> i64 {
        self.secs as i64 * 1_000_000_000
    }

    /// Number of intervals in one day (zero for timeframes longer than a day)
    pub fn intervals_per_day(&self) -> i64 {
        (DAY / self.secs) as i64
    }
}

impl FromStr for Timeframe {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Timeframe::parse(s)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
