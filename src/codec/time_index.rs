//! Time ⇄ index ⇄ offset arithmetic
//!
//! Every bucket file covers one UTC calendar year. Records are addressed
//! by a 1-based interval index counted from January 1st:
//!
//! ```text
//!   index  = 1 + (t - Jan1) / timeframe
//!   time   = Jan1 + (index - 1) * timeframe
//!   offset = HEADER_SIZE + (index - 1) * record_len
//! ```
//!
//! Variable records additionally carry 32-bit interval ticks: the position
//! of the timestamp inside its interval, scaled so the full interval spans
//! 2^32 ticks.

use chrono::{Datelike, TimeZone, Utc};

use super::header::HEADER_SIZE;
use super::timeframe::Timeframe;
use crate::error::{Result, StoreError};

const NANOS_PER_SEC: i64 = 1_000_000_000;
const TICKS_PER_INTERVAL: u128 = 1 << 32;

/// Epoch seconds of January 1st 00:00:00 UTC of `year`
pub fn year_start(year: i32) -> Result<i64> {
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .map(|t| t.timestamp())
        .ok_or_else(|| StoreError::Codec(format!("year out of range: {}", year)))
}

/// UTC calendar year containing `epoch`
pub fn year_of(epoch: i64) -> Result<i32> {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .map(|t| t.year())
        .ok_or_else(|| StoreError::Codec(format!("epoch out of range: {}", epoch)))
}

pub fn time_to_index(epoch: i64, tf: &Timeframe) -> Result<i64> {
    let start = year_start(year_of(epoch)?)?;
    Ok(1 + (epoch - start) / tf.as_secs())
}

pub fn index_to_time(index: i64, tf: &Timeframe, year: i32) -> Result<i64> {
    if index < 1 {
        return Err(StoreError::Codec(format!("index must be 1-based, got {}", index)));
    }
    Ok(year_start(year)? + (index - 1) * tf.as_secs())
}

pub fn index_to_offset(index: i64, record_len: i64) -> i64 {
    (index - 1) * record_len + HEADER_SIZE as i64
}

pub fn offset_to_index(offset: i64, record_len: i64) -> i64 {
    (offset - HEADER_SIZE as i64) / record_len + 1
}

/// Ticks locating `(epoch, nanos)` inside interval `index` of `year`
///
/// Saturates at `u32::MAX` for timestamps past the end of the interval.
pub fn interval_ticks(epoch: i64, nanos: i32, index: i64, tf: &Timeframe, year: i32) -> Result<u32> {
    let base = index_to_time(index, tf, year)?;
    let since = (epoch - base) * NANOS_PER_SEC + nanos as i64;
    if since < 0 {
        return Err(StoreError::Codec(format!(
            "timestamp {}.{:09} precedes interval {} of {}",
            epoch, nanos, index, year
        )));
    }
    let ticks = (since as u128 * TICKS_PER_INTERVAL) / tf.as_nanos() as u128;
    Ok(ticks.min(u32::MAX as u128) as u32)
}

/// Inverse of [`interval_ticks`]: returns `(epoch, nanoseconds)`
///
/// Rounds up, so the result maps back to the same ticks through
/// [`interval_ticks`] on every timeframe of at least 2^32 ns, and
/// nanoseconds that produced `ticks` on a finer timeframe come back exact.
pub fn ticks_to_time(index: i64, ticks: u32, tf: &Timeframe, year: i32) -> Result<(i64, i32)> {
    let base = index_to_time(index, tf, year)?;
    let nanos = (ticks as u128 * tf.as_nanos() as u128 + TICKS_PER_INTERVAL - 1) >> 32;
    let nanos = nanos as i64;
    Ok((base + nanos / NANOS_PER_SEC, (nanos % NANOS_PER_SEC) as i32))
}
