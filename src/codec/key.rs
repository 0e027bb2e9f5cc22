//! Time bucket keys and bucket paths

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::timeframe::Timeframe;
use crate::error::{Result, StoreError};

/// `{Symbol}/{Timeframe}/{RecordFormat}`, e.g. `AAPL/1Min/OHLCV`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeBucketKey {
    pub symbol: String,
    pub timeframe: String,
    pub record_format: String,
}

impl TimeBucketKey {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        record_format: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            record_format: record_format.into(),
        }
    }

    pub fn parse(key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [symbol, timeframe, format]
                if is_plain_component(symbol) && is_plain_component(timeframe) && is_plain_component(format) =>
            {
                Ok(Self::new(*symbol, *timeframe, *format))
            }
            _ => Err(StoreError::InvalidKey(format!(
                "expected SYMBOL/TIMEFRAME/FORMAT, got {}",
                key
            ))),
        }
    }

    pub fn timeframe(&self) -> Result<Timeframe> {
        Timeframe::parse(&self.timeframe)
    }

    /// Bucket directory under `root`
    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(&self.symbol)
            .join(&self.timeframe)
            .join(&self.record_format)
    }

    /// Year file under `root`
    pub fn year_file(&self, root: &Path, year: i32) -> PathBuf {
        self.dir(root).join(format!("{}.bin", year))
    }

    /// Root-relative WAL key, `SYM/TF/FORMAT/YEAR.bin`
    pub fn wal_key(&self, year: i32) -> String {
        format!("{}/{}.bin", self, year)
    }

    /// Recover the key and year from a path ending in
    /// `{Symbol}/{Timeframe}/{Format}/{Year}.bin`. Leading components are
    /// ignored, so both absolute and root-relative paths work.
    pub fn from_bucket_path(path: &str) -> Result<(Self, i32)> {
        let bad = || {
            StoreError::InvalidKey(format!(
                "path does not end in SYMBOL/TIMEFRAME/FORMAT/YEAR.bin: {}",
                path
            ))
        };

        let mut parts = path.rsplit('/');
        let file = parts.next().ok_or_else(bad)?;
        let year_str = file.strip_suffix(".bin").ok_or_else(bad)?;
        if year_str.is_empty() || !year_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let year: i32 = year_str.parse().map_err(|_| bad())?;

        let format = parts.next().filter(|s| is_plain_component(s)).ok_or_else(bad)?;
        let timeframe = parts.next().filter(|s| is_plain_component(s)).ok_or_else(bad)?;
        let symbol = parts.next().filter(|s| is_plain_component(s)).ok_or_else(bad)?;

        Ok((Self::new(symbol, timeframe, format), year))
    }

    /// Parse a root-relative WAL key. Only the exact form produced by
    /// [`wal_key`](Self::wal_key) is accepted, so a key can never name a
    /// file outside the data root.
    pub fn from_wal_key(key: &str) -> Result<(Self, i32)> {
        let (bucket, year) = Self::from_bucket_path(key)?;
        if bucket.wal_key(year) != key {
            return Err(StoreError::InvalidKey(format!(
                "expected SYMBOL/TIMEFRAME/FORMAT/YEAR.bin relative to the data root, got {}",
                key
            )));
        }
        Ok((bucket, year))
    }
}

/// A single path component that cannot climb out of its directory
fn is_plain_component(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['\\', '\0'])
}

impl FromStr for TimeBucketKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        TimeBucketKey::parse(s)
    }
}

impl fmt::Display for TimeBucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.timeframe, self.record_format)
    }
}
