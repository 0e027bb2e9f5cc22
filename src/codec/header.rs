//! Bucket file header
//!
//! Every `{Year}.bin` file starts with a fixed 37024-byte header:
//!
//! ```text
//! ┌──────────────┬──────────────────┬──────────┬───────────────┐
//! │ Version (8)  │ Description(256) │ Year (8) │ Timeframe (8) │
//! ├──────────────┼──────────────────┼──────────┼───────────────┤
//! │ RecType (8)  │ NElements (8)    │ RecLen(8)│ Reserved (8)  │
//! ├──────────────┴──────────────────┴──────────┴───────────────┤
//! │ Element names: 1024 × 32 bytes, NUL padded                 │
//! ├────────────────────────────────────────────────────────────┤
//! │ Element types: 1024 × 1 byte                               │
//! ├────────────────────────────────────────────────────────────┤
//! │ Reserved: 365 × 8 bytes                                    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Integers are little-endian. Timeframe is stored in nanoseconds. The
//! element list excludes `Epoch` (and `Nanoseconds` for variable buckets).

use std::time::Duration;

use chrono::{Datelike, TimeZone, Utc};

use super::timeframe::Timeframe;
use super::types::{align8, shapes_byte_len, DataShape, ElementType, RecordType};
use crate::error::{Result, StoreError};

pub const HEADER_SIZE: usize = 37024;
pub const FILE_VERSION: i64 = 2;
pub const MAX_ELEMENTS: usize = 1024;

const DESCRIPTION_LEN: usize = 256;
const ELEMENT_NAME_LEN: usize = 32;
const FIXED_PART_LEN: usize = 7 * 8 + DESCRIPTION_LEN;
const NAMES_OFFSET: usize = FIXED_PART_LEN;
const TYPES_OFFSET: usize = NAMES_OFFSET + MAX_ELEMENTS * ELEMENT_NAME_LEN;

/// Width of the epoch slot at the front of each fixed record
pub const EPOCH_LEN: usize = 8;
/// Width of the interval ticks trailer on each variable row
pub const TICKS_LEN: usize = 4;
/// Width of the indirect pointer `{index, offset, len}` in variable buckets
pub const INDIRECT_RECORD_LEN: usize = 24;

pub const EPOCH_COLUMN: &str = "Epoch";
pub const NANOSECONDS_COLUMN: &str = "Nanoseconds";

/// Decoded bucket header plus the lengths derived from it
#[derive(Debug, Clone, PartialEq)]
pub struct BucketInfo {
    pub version: i64,
    pub description: String,
    pub year: i32,
    pub timeframe: Timeframe,
    pub record_type: RecordType,
    /// Stored columns only
    pub shapes: Vec<DataShape>,
    pub record_len: i64,
}

impl BucketInfo {
    /// Describe a new bucket. `Epoch` and `Nanoseconds` columns in `shapes`
    /// are dropped; they are implicit in every bucket.
    pub fn new(
        timeframe: Timeframe,
        description: impl Into<String>,
        year: i32,
        shapes: &[DataShape],
        record_type: RecordType,
    ) -> Result<Self> {
        let shapes: Vec<DataShape> = shapes
            .iter()
            .filter(|s| s.name != EPOCH_COLUMN && s.name != NANOSECONDS_COLUMN)
            .cloned()
            .collect();

        if shapes.len() > MAX_ELEMENTS {
            return Err(StoreError::Codec(format!(
                "{} columns exceed the {} column limit",
                shapes.len(),
                MAX_ELEMENTS
            )));
        }
        if let Some(bad) = shapes.iter().find(|s| !s.element_type.is_storable()) {
            return Err(StoreError::Codec(format!("column {} is not storable", bad)));
        }

        let record_len = record_len_for(record_type, &shapes);

        Ok(Self {
            version: FILE_VERSION,
            description: description.into(),
            year,
            timeframe,
            record_type,
            shapes,
            record_len,
        })
    }

    /// Length of one stored variable row (columns plus interval ticks);
    /// zero for fixed buckets
    pub fn var_rec_len(&self) -> usize {
        match self.record_type {
            RecordType::Fixed => 0,
            RecordType::Variable => shapes_byte_len(&self.shapes) + TICKS_LEN,
        }
    }

    /// Stored columns with `Epoch` prepended
    pub fn shapes_with_epoch(&self) -> Vec<DataShape> {
        let mut out = Vec::with_capacity(self.shapes.len() + 2);
        out.push(DataShape::new(EPOCH_COLUMN, ElementType::Int64));
        out.extend(self.shapes.iter().cloned());
        out
    }

    /// Number of intervals in the bucket's year
    pub fn intervals_in_year(&self) -> Result<i64> {
        let start = Utc
            .with_ymd_and_hms(self.year, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| StoreError::Codec(format!("year out of range: {}", self.year)))?;
        let end = Utc
            .with_ymd_and_hms(start.year() + 1, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| StoreError::Codec(format!("year out of range: {}", self.year)))?;
        Ok((end - start).num_seconds() / self.timeframe.as_secs())
    }

    /// Full pre-allocated size of a bucket file
    pub fn file_size(&self) -> Result<u64> {
        Ok(HEADER_SIZE as u64 + (self.intervals_in_year()? * self.record_len) as u64)
    }

    /// Replace the element types, keeping names and count
    pub fn set_element_types(&mut self, types: &[ElementType]) -> Result<()> {
        if types.len() != self.shapes.len() {
            return Err(StoreError::Codec(format!(
                "element count mismatch: header has {}, got {}",
                self.shapes.len(),
                types.len()
            )));
        }
        for (shape, ty) in self.shapes.iter_mut().zip(types) {
            shape.element_type = *ty;
        }
        Ok(())
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];

        put_i64(&mut buf, 0, self.version);
        let desc = self.description.as_bytes();
        let desc_len = desc.len().min(DESCRIPTION_LEN);
        buf[8..8 + desc_len].copy_from_slice(&desc[..desc_len]);

        let mut pos = 8 + DESCRIPTION_LEN;
        for value in [
            self.year as i64,
            self.timeframe.as_nanos(),
            self.record_type.code() as i64,
            self.shapes.len() as i64,
            self.record_len,
            0,
        ] {
            put_i64(&mut buf, pos, value);
            pos += 8;
        }

        for (i, shape) in self.shapes.iter().enumerate() {
            let name = shape.name.as_bytes();
            let len = name.len().min(ELEMENT_NAME_LEN);
            let start = NAMES_OFFSET + i * ELEMENT_NAME_LEN;
            buf[start..start + len].copy_from_slice(&name[..len]);
            buf[TYPES_OFFSET + i] = shape.element_type.code();
        }

        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StoreError::Codec(format!(
                "incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let version = get_i64(bytes, 0);
        let description = trim_nul(&bytes[8..8 + DESCRIPTION_LEN]);
        let mut pos = 8 + DESCRIPTION_LEN;
        let mut next = || {
            let v = get_i64(bytes, pos);
            pos += 8;
            v
        };
        let year = next();
        let timeframe_ns = next();
        let record_type = RecordType::from_code(next())?;
        let n_elements = next();
        let record_len = next();

        if !(0..=MAX_ELEMENTS as i64).contains(&n_elements) {
            return Err(StoreError::Codec(format!("bad element count {}", n_elements)));
        }
        if timeframe_ns <= 0 {
            return Err(StoreError::Codec(format!("bad timeframe {}ns", timeframe_ns)));
        }
        let year = i32::try_from(year)
            .map_err(|_| StoreError::Codec(format!("bad year {}", year)))?;
        let timeframe = Timeframe::from_duration(Duration::from_nanos(timeframe_ns as u64))?;

        let mut shapes = Vec::with_capacity(n_elements as usize);
        for i in 0..n_elements as usize {
            let start = NAMES_OFFSET + i * ELEMENT_NAME_LEN;
            let name = trim_nul(&bytes[start..start + ELEMENT_NAME_LEN]);
            let ty = ElementType::from_code(bytes[TYPES_OFFSET + i])?;
            shapes.push(DataShape::new(name, ty));
        }

        let expected = record_len_for(record_type, &shapes);
        if record_len != expected {
            return Err(StoreError::Codec(format!(
                "bad record length {}: {} columns of a {:?} bucket need {}",
                record_len,
                shapes.len(),
                record_type,
                expected
            )));
        }

        Ok(Self {
            version,
            description,
            year,
            timeframe,
            record_type,
            shapes,
            record_len,
        })
    }
}

/// Slot length of one interval: epoch plus aligned columns for fixed
/// buckets, an index record for variable ones
fn record_len_for(record_type: RecordType, shapes: &[DataShape]) -> i64 {
    match record_type {
        RecordType::Fixed => (EPOCH_LEN + align8(shapes_byte_len(shapes))) as i64,
        RecordType::Variable => INDIRECT_RECORD_LEN as i64,
    }
}

fn put_i64(buf: &mut [u8], pos: usize, value: i64) {
    buf[pos..pos + 8].copy_from_slice(&value.to_le_bytes());
}

fn get_i64(buf: &[u8], pos: usize) -> i64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[pos..pos + 8]);
    i64::from_le_bytes(word)
}

fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
