//! WAL integration tests

mod cleaner_tests;
mod file_tests;
mod replay_tests;

use tickstore::codec::{index_to_offset, DataShape, ElementType, RecordType, TimeBucketKey};
use tickstore::wal::{TransactionGroup, WTSet};

// =============================================================================
// Shared Helpers
// =============================================================================

/// Daily bucket with a single Int64 column
pub fn value_key() -> TimeBucketKey {
    TimeBucketKey::new("S", "1D", "V")
}

/// Fixed write of `value` into day `index` of 2020
pub fn value_set(index: i64, value: i64) -> WTSet {
    WTSet::new(
        RecordType::Fixed,
        value_key().wal_key(2020),
        0,
        index_to_offset(index, 16),
        index,
        &value.to_le_bytes(),
        vec![DataShape::new("V", ElementType::Int64)],
    )
}

/// Write into day 400 of a 2020 daily bucket, which has 366 days
pub fn out_of_year_set() -> WTSet {
    WTSet::new(
        RecordType::Fixed,
        TimeBucketKey::new("T", "1D", "V").wal_key(2020),
        0,
        index_to_offset(400, 16),
        400,
        &0i64.to_le_bytes(),
        vec![DataShape::new("V", ElementType::Int64)],
    )
}

/// Serialized TG holding one write of `value` into day `index`
pub fn tg_bytes(tgid: i64, index: i64, value: i64) -> Vec<u8> {
    TransactionGroup::new(tgid, vec![value_set(index, value)])
        .serialize()
        .unwrap()
}
