//! Row-series encoding
//!
//! The codec's logical representation is a packed run of rows, each row
//! laid out as:
//!
//! ```text
//! Fixed:    ┌───────────┬─────────────────┬─────────────┐
//!           │ Epoch (8) │ Columns (LE)    │ Pad to 8    │
//!           └───────────┴─────────────────┴─────────────┘
//! Variable: ┌───────────┬─────────────────┬─────────────────┐
//!           │ Epoch (8) │ Columns (LE)    │ Nanoseconds (4) │
//!           └───────────┴─────────────────┴─────────────────┘
//! ```
//!
//! Stored records differ from logical rows: fixed records drop the epoch
//! (the file position implies it) and variable rows replace epoch and
//! nanoseconds with 4 bytes of interval ticks. [`format_record`] and
//! [`expand_rows`] convert between the two.

use super::column::{ColumnData, ColumnSeries};
use super::header::{EPOCH_COLUMN, EPOCH_LEN, NANOSECONDS_COLUMN, TICKS_LEN};
use super::time_index::{index_to_time, ticks_to_time};
use super::timeframe::Timeframe;
use super::types::{align8, shapes_byte_len, DataShape, ElementType, RecordType};
use crate::error::{Result, StoreError};

/// Length of one logical row for `shapes` (stored columns only)
pub fn row_len(shapes: &[DataShape], record_type: RecordType) -> usize {
    let payload = shapes_byte_len(shapes);
    match record_type {
        RecordType::Fixed => EPOCH_LEN + align8(payload),
        RecordType::Variable => EPOCH_LEN + payload + 4,
    }
}

/// Stored columns of a series: everything except `Epoch` and `Nanoseconds`
pub fn data_shapes(series: &ColumnSeries) -> Vec<DataShape> {
    series
        .shapes()
        .into_iter()
        .filter(|s| s.name != EPOCH_COLUMN && s.name != NANOSECONDS_COLUMN)
        .collect()
}

// =============================================================================
// Logical rows
// =============================================================================

/// Encode a column series into packed logical rows
///
/// For variable records a missing `Nanoseconds` column encodes as zero.
pub fn encode_rows(series: &ColumnSeries, record_type: RecordType) -> Result<Vec<u8>> {
    series.validate()?;
    let epochs = series.epoch()?;

    let nanos = match (record_type, series.column(NANOSECONDS_COLUMN)) {
        (RecordType::Variable, Some(ColumnData::Int32(v))) => Some(v.as_slice()),
        (RecordType::Variable, Some(other)) => {
            return Err(StoreError::Codec(format!(
                "Nanoseconds column must be int32, got {}",
                other.element_type()
            )))
        }
        _ => None,
    };

    let data: Vec<&ColumnData> = series
        .columns()
        .filter(|(name, _)| *name != EPOCH_COLUMN && *name != NANOSECONDS_COLUMN)
        .map(|(_, col)| col)
        .collect();
    let shapes = data_shapes(series);
    let payload_len = shapes_byte_len(&shapes);
    let width = row_len(&shapes, record_type);

    let mut out = Vec::with_capacity(width * epochs.len());
    for (row, epoch) in epochs.iter().enumerate() {
        out.extend_from_slice(&epoch.to_le_bytes());
        for col in &data {
            col.write_le(row, &mut out)?;
        }
        match record_type {
            RecordType::Fixed => {
                out.resize(out.len() + align8(payload_len) - payload_len, 0);
            }
            RecordType::Variable => {
                let ns = nanos.map(|v| v[row]).unwrap_or(0);
                out.extend_from_slice(&ns.to_le_bytes());
            }
        }
    }
    Ok(out)
}

/// Decode packed logical rows into a column series
///
/// `shapes` lists the stored columns only; the result gains a leading
/// `Epoch` column and, for variable records, a trailing `Nanoseconds`.
pub fn decode_rows(bytes: &[u8], shapes: &[DataShape], record_type: RecordType) -> Result<ColumnSeries> {
    let width = row_len(shapes, record_type);
    if bytes.len() % width != 0 {
        return Err(StoreError::Codec(format!(
            "row data of {} bytes is not a multiple of the {}-byte row length",
            bytes.len(),
            width
        )));
    }
    let rows = bytes.len() / width;

    let mut epochs = Vec::with_capacity(rows);
    let mut nanos = Vec::new();
    let mut columns = shapes
        .iter()
        .map(|s| ColumnData::empty(s.element_type))
        .collect::<Result<Vec<_>>>()?;

    for row in bytes.chunks_exact(width) {
        epochs.push(read_i64(&row[..EPOCH_LEN]));
        let mut pos = EPOCH_LEN;
        for (col, shape) in columns.iter_mut().zip(shapes) {
            let size = shape.element_type.size();
            col.push_le(&row[pos..pos + size])?;
            pos += size;
        }
        if record_type == RecordType::Variable {
            nanos.push(read_i32(&row[width - 4..]));
        }
    }

    let mut series = ColumnSeries::new().with_column(EPOCH_COLUMN, ColumnData::Int64(epochs));
    for (col, shape) in columns.into_iter().zip(shapes) {
        series.add_column(shape.name.clone(), col);
    }
    if record_type == RecordType::Variable {
        series.add_column(NANOSECONDS_COLUMN, ColumnData::Int32(nanos));
    }
    Ok(series)
}

// =============================================================================
// Stored records
// =============================================================================

/// Convert one logical row into its stored form
///
/// Fixed rows lose the epoch. Variable rows lose epoch and nanoseconds and
/// gain `ticks`.
pub fn format_record(row: &[u8], record_type: RecordType, ticks: u32, out: &mut Vec<u8>) -> Result<()> {
    if row.len() < EPOCH_LEN {
        return Err(StoreError::Codec(format!("row of {} bytes has no epoch", row.len())));
    }
    match record_type {
        RecordType::Fixed => out.extend_from_slice(&row[EPOCH_LEN..]),
        RecordType::Variable => {
            if row.len() < EPOCH_LEN + 4 {
                return Err(StoreError::Codec(format!(
                    "variable row of {} bytes has no nanoseconds",
                    row.len()
                )));
            }
            out.extend_from_slice(&row[EPOCH_LEN..row.len() - 4]);
            out.extend_from_slice(&ticks.to_le_bytes());
        }
    }
    Ok(())
}

/// Rebuild logical rows from the stored payload of one interval
///
/// For fixed buckets `data` is one aligned record; for variable buckets it
/// is a run of `var_rec_len`-byte rows each ending in interval ticks.
pub fn expand_rows(
    data: &[u8],
    shapes: &[DataShape],
    record_type: RecordType,
    index: i64,
    tf: &Timeframe,
    year: i32,
) -> Result<Vec<u8>> {
    let payload_len = shapes_byte_len(shapes);
    match record_type {
        RecordType::Fixed => {
            let stored = align8(payload_len);
            if data.len() != stored {
                return Err(StoreError::Codec(format!(
                    "fixed record is {} bytes, columns need {}",
                    data.len(),
                    stored
                )));
            }
            let epoch = index_to_time(index, tf, year)?;
            let mut out = Vec::with_capacity(EPOCH_LEN + stored);
            out.extend_from_slice(&epoch.to_le_bytes());
            out.extend_from_slice(data);
            Ok(out)
        }
        RecordType::Variable => {
            let var_rec_len = payload_len + TICKS_LEN;
            if data.len() % var_rec_len != 0 {
                return Err(StoreError::Codec(format!(
                    "variable data of {} bytes is not a multiple of the {}-byte row length",
                    data.len(),
                    var_rec_len
                )));
            }
            let mut out = Vec::with_capacity(data.len() / var_rec_len * (EPOCH_LEN + var_rec_len));
            for row in data.chunks_exact(var_rec_len) {
                let ticks = read_u32(&row[payload_len..]);
                let (epoch, nanos) = ticks_to_time(index, ticks, tf, year)?;
                out.extend_from_slice(&epoch.to_le_bytes());
                out.extend_from_slice(&row[..payload_len]);
                out.extend_from_slice(&nanos.to_le_bytes());
            }
            Ok(out)
        }
    }
}

/// Verify a series carries exactly the stored columns of a bucket, in order
pub fn check_shapes(series: &ColumnSeries, expected: &[DataShape]) -> std::result::Result<(), String> {
    let got = data_shapes(series);
    if got.len() != expected.len() {
        return Err(format!(
            "{} data columns, bucket has {}",
            got.len(),
            expected.len()
        ));
    }
    for (g, e) in got.iter().zip(expected) {
        if g != e {
            return Err(format!("column {} does not match bucket column {}", g, e));
        }
    }
    match series.column(EPOCH_COLUMN).map(ColumnData::element_type) {
        Some(ElementType::Int64) => Ok(()),
        _ => Err("missing Int64 Epoch column".to_string()),
    }
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(bytes);
    i64::from_le_bytes(word)
}

fn read_i32(bytes: &[u8]) -> i32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    i32::from_le_bytes(word)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    u32::from_le_bytes(word)
}
