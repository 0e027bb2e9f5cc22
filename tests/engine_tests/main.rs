//! Engine integration tests

mod lifecycle_tests;

use std::path::Path;
use std::time::Duration;

use tickstore::codec::{ColumnData, ColumnSeries, ColumnSeriesMap, TimeBucketKey, EPOCH_COLUMN, NANOSECONDS_COLUMN};
use tickstore::{Config, Engine};

// =============================================================================
// Shared Helpers
// =============================================================================

pub const JAN_1_2020: i64 = 1_577_836_800;

pub fn amzn() -> TimeBucketKey {
    TimeBucketKey::new("AMZN", "1Min", "OHLC")
}

pub fn btc() -> TimeBucketKey {
    TimeBucketKey::new("BTC", "1Sec", "TICK")
}

/// Consecutive one-minute OHLC bars starting at `start`
pub fn ohlc_bars(start: i64, opens: &[f32]) -> ColumnSeriesMap {
    let epochs: Vec<i64> = (0..opens.len() as i64).map(|i| start + 60 * i).collect();
    let series = ColumnSeries::new()
        .with_column(EPOCH_COLUMN, ColumnData::Int64(epochs))
        .with_column("Open", ColumnData::Float32(opens.to_vec()))
        .with_column("High", ColumnData::Float32(opens.iter().map(|o| o + 1.0).collect()))
        .with_column("Low", ColumnData::Float32(opens.iter().map(|o| o - 1.0).collect()))
        .with_column("Close", ColumnData::Float32(opens.to_vec()));
    let mut csm = ColumnSeriesMap::new();
    csm.insert(amzn(), series);
    csm
}

/// Trades that all fall in the second `epoch`
pub fn trades(epoch: i64, rows: &[(f32, i32)]) -> ColumnSeriesMap {
    let series = ColumnSeries::new()
        .with_column(EPOCH_COLUMN, ColumnData::Int64(vec![epoch; rows.len()]))
        .with_column("Price", ColumnData::Float32(rows.iter().map(|r| r.0).collect()))
        .with_column(NANOSECONDS_COLUMN, ColumnData::Int32(rows.iter().map(|r| r.1).collect()));
    let mut csm = ColumnSeriesMap::new();
    csm.insert(btc(), series);
    csm
}

/// Primary with no background threads: every write commits inline
pub fn inline_config(root: &Path, instance_id: i64) -> Config {
    Config::builder()
        .root_dir(root)
        .instance_id(instance_id)
        .background_sync(false)
        .build()
}

pub fn fast_sync_config(root: &Path, instance_id: i64) -> tickstore::config::ConfigBuilder {
    Config::builder()
        .root_dir(root)
        .instance_id(instance_id)
        .wal_sync_interval(Duration::from_millis(20))
        .primary_refresh_interval(Duration::from_millis(100))
        .rotate_every_checkpoints(0)
}

pub fn open_column(engine: &Engine, first: i64, last: i64) -> Vec<f32> {
    match engine.read(&amzn(), 2020, first, last).unwrap().column("Open") {
        Some(ColumnData::Float32(v)) => v.clone(),
        other => panic!("unexpected Open column: {:?}", other),
    }
}
