//! Tests for the Bucket File Header
//!
//! These tests verify:
//! - Header encoding is exactly HEADER_SIZE bytes and decodes back
//! - Record lengths for fixed and variable buckets
//! - Pre-allocated file sizes for leap and common years
//! - Truncated or invalid headers are rejected

use tickstore::codec::{
    BucketInfo, DataShape, ElementType, RecordType, Timeframe, EPOCH_COLUMN, FILE_VERSION,
    HEADER_SIZE, INDIRECT_RECORD_LEN, NANOSECONDS_COLUMN,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn ohlc_shapes() -> Vec<DataShape> {
    ["Open", "High", "Low", "Close"]
        .iter()
        .map(|n| DataShape::new(*n, ElementType::Float32))
        .collect()
}

fn fixed_info(tf: &str, year: i32) -> BucketInfo {
    BucketInfo::new(Timeframe::parse(tf).unwrap(), "test bucket", year, &ohlc_shapes(), RecordType::Fixed)
        .unwrap()
}

// =============================================================================
// Encoding
// =============================================================================

#[test]
fn test_header_is_fixed_size_and_decodes_back() {
    let info = fixed_info("1Min", 2020);
    let bytes = info.encode();
    assert_eq!(bytes.len(), HEADER_SIZE);
    assert_eq!(&bytes[..8], &FILE_VERSION.to_le_bytes());

    let back = BucketInfo::decode(&bytes).unwrap();
    assert_eq!(back, info);
    assert_eq!(back.timeframe.as_secs(), 60);
    assert_eq!(back.description, "test bucket");
}

#[test]
fn test_implicit_columns_are_not_stored() {
    let mut shapes = vec![DataShape::new(EPOCH_COLUMN, ElementType::Int64)];
    shapes.extend(ohlc_shapes());
    shapes.push(DataShape::new(NANOSECONDS_COLUMN, ElementType::Int32));

    let info = BucketInfo::new(Timeframe::parse("1Sec").unwrap(), "", 2021, &shapes, RecordType::Variable).unwrap();
    assert_eq!(info.shapes, ohlc_shapes());
    assert_eq!(info.shapes_with_epoch()[0].name, EPOCH_COLUMN);
}

#[test]
fn test_decode_rejects_short_header() {
    let bytes = fixed_info("1Min", 2020).encode();
    assert!(BucketInfo::decode(&bytes[..HEADER_SIZE - 1]).is_err());
}

#[test]
fn test_decode_rejects_unknown_element_type() {
    let mut bytes = fixed_info("1Min", 2020).encode();
    let types_offset = 7 * 8 + 256 + 1024 * 32;
    bytes[types_offset] = 99;
    assert!(BucketInfo::decode(&bytes).is_err());
}

#[test]
fn test_unstorable_column_is_rejected() {
    let shapes = vec![DataShape::new("Name", ElementType::String)];
    let result = BucketInfo::new(Timeframe::parse("1D").unwrap(), "", 2020, &shapes, RecordType::Fixed);
    assert!(result.is_err());
}

// =============================================================================
// Derived Lengths
// =============================================================================

#[test]
fn test_record_lengths() {
    let fixed = fixed_info("1Min", 2020);
    assert_eq!(fixed.record_len, 8 + 16);
    assert_eq!(fixed.var_rec_len(), 0);

    let variable = BucketInfo::new(
        Timeframe::parse("1Sec").unwrap(),
        "",
        2020,
        &ohlc_shapes(),
        RecordType::Variable,
    )
    .unwrap();
    assert_eq!(variable.record_len, INDIRECT_RECORD_LEN as i64);
    assert_eq!(variable.var_rec_len(), 16 + 4);
}

#[test]
fn test_file_size_covers_every_interval_of_the_year() {
    let leap = fixed_info("1Min", 2020);
    assert_eq!(leap.intervals_in_year().unwrap(), 366 * 1440);
    assert_eq!(leap.file_size().unwrap(), HEADER_SIZE as u64 + 366 * 1440 * 24);

    let common = fixed_info("1D", 2021);
    assert_eq!(common.intervals_in_year().unwrap(), 365);
    assert_eq!(common.file_size().unwrap(), HEADER_SIZE as u64 + 365 * 24);
}

#[test]
fn test_set_element_types_keeps_names() {
    let mut info = fixed_info("1D", 2020);
    info.set_element_types(&[ElementType::Float64; 4]).unwrap();
    assert!(info.shapes.iter().all(|s| s.element_type == ElementType::Float64));
    assert_eq!(info.shapes[0].name, "Open");
    assert!(info.set_element_types(&[ElementType::Float64; 3]).is_err());
}
