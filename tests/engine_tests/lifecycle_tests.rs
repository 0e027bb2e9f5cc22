//! Tests for the Engine lifecycle
//!
//! These tests verify:
//! - Written bars and trades read back through the engine
//! - Data survives a clean shutdown and reopen
//! - A crashed instance's WAL restores lost bucket files on the next open
//! - Replicas refuse client writes

use std::fs;
use std::time::Duration;

use tempfile::TempDir;
use tickstore::codec::{ColumnData, EPOCH_COLUMN, NANOSECONDS_COLUMN};
use tickstore::config::Role;
use tickstore::wal::list_wal_files;
use tickstore::{Config, Engine, StoreError};

use super::{amzn, btc, fast_sync_config, inline_config, ohlc_bars, open_column, trades, JAN_1_2020};

// =============================================================================
// Read/Write Tests
// =============================================================================

#[test]
fn test_write_then_read_bars() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(inline_config(temp_dir.path(), 1)).unwrap();
    assert_eq!(engine.role(), Role::Primary);

    engine.write_csm(&ohlc_bars(JAN_1_2020, &[10.0, 11.0, 12.0]), false).unwrap();

    let series = engine.read(&amzn(), 2020, 1, 3).unwrap();
    assert_eq!(
        series.column(EPOCH_COLUMN),
        Some(&ColumnData::Int64(vec![JAN_1_2020, JAN_1_2020 + 60, JAN_1_2020 + 120]))
    );
    assert_eq!(series.column("High"), Some(&ColumnData::Float32(vec![11.0, 12.0, 13.0])));
    assert!(temp_dir.path().join("AMZN/1Min/OHLC/2020.bin").exists());
    assert_eq!(engine.wal().last_tgid(), 1);
}

#[test]
fn test_overwrite_and_sparse_read() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(inline_config(temp_dir.path(), 1)).unwrap();

    engine.write_csm(&ohlc_bars(JAN_1_2020, &[1.0, 2.0]), false).unwrap();
    engine.write_csm(&ohlc_bars(JAN_1_2020 + 60, &[20.0]), false).unwrap();
    engine.write_csm(&ohlc_bars(JAN_1_2020 + 600, &[5.0]), false).unwrap();

    // Only minutes 1, 2 and 11 hold bars
    assert_eq!(open_column(&engine, 1, 20), vec![1.0, 20.0, 5.0]);
}

#[test]
fn test_write_then_read_trades() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(inline_config(temp_dir.path(), 1)).unwrap();
    let second = JAN_1_2020 + 3600;

    engine.write_csm(&trades(second, &[(100.5, 750_000_000)]), true).unwrap();
    engine.write_csm(&trades(second, &[(100.0, 250_000_000)]), true).unwrap();

    let series = engine.read(&btc(), 2020, 3601, 3601).unwrap();
    assert_eq!(series.column(EPOCH_COLUMN), Some(&ColumnData::Int64(vec![second, second])));
    assert_eq!(series.column("Price"), Some(&ColumnData::Float32(vec![100.0, 100.5])));
    assert_eq!(
        series.column(NANOSECONDS_COLUMN),
        Some(&ColumnData::Int32(vec![250_000_000, 750_000_000]))
    );
}

#[test]
fn test_schema_change_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(inline_config(temp_dir.path(), 1)).unwrap();
    engine.write_csm(&ohlc_bars(JAN_1_2020, &[1.0]), false).unwrap();

    let mut csm = ohlc_bars(JAN_1_2020 + 60, &[2.0]);
    if let Some(series) = csm.get_mut(&amzn()) {
        series.add_column("Volume", ColumnData::Int64(vec![7]));
    }
    let err = engine.write_csm(&csm, false).unwrap_err();
    assert!(matches!(err, StoreError::SchemaMismatch { .. }));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_data_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(fast_sync_config(temp_dir.path(), 1).build()).unwrap();
        engine.write_csm(&ohlc_bars(JAN_1_2020, &[1.0, 2.0, 3.0]), false).unwrap();
        engine.shutdown().unwrap();
        // Second shutdown (and the one on drop) is a no-op
        engine.shutdown().unwrap();
        assert!(engine.write_csm(&ohlc_bars(JAN_1_2020, &[9.0]), false).is_err());
    }

    let engine = Engine::open(fast_sync_config(temp_dir.path(), 2).build()).unwrap();
    assert_eq!(open_column(&engine, 1, 3), vec![1.0, 2.0, 3.0]);

    // The closed segment was cleaned up; only the new one remains
    let wal_files = list_wal_files(temp_dir.path()).unwrap();
    assert_eq!(wal_files.len(), 1);
    assert_eq!(Some(wal_files[0].clone()), engine.wal().current_path());
}

#[test]
fn test_crash_recovery_restores_buckets() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(inline_config(temp_dir.path(), 1)).unwrap();
    engine.write_csm(&ohlc_bars(JAN_1_2020, &[1.0, 2.0]), false).unwrap();
    engine.write_csm(&trades(JAN_1_2020, &[(50.0, 0)]), true).unwrap();

    // Simulate a crash: no shutdown, the WAL stays open
    std::mem::forget(engine);
    fs::remove_dir_all(temp_dir.path().join("AMZN")).unwrap();
    fs::remove_dir_all(temp_dir.path().join("BTC")).unwrap();

    let engine = Engine::open(inline_config(temp_dir.path(), 2)).unwrap();
    assert_eq!(open_column(&engine, 1, 2), vec![1.0, 2.0]);
    let series = engine.read(&btc(), 2020, 1, 1).unwrap();
    assert_eq!(series.column("Price"), Some(&ColumnData::Float32(vec![50.0])));
}

#[test]
fn test_wal_bypass_writes_files_without_wal() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .root_dir(temp_dir.path())
        .instance_id(1)
        .background_sync(false)
        .wal_bypass(true)
        .build();
    let engine = Engine::open(config).unwrap();

    engine.write_csm(&ohlc_bars(JAN_1_2020, &[4.0]), false).unwrap();
    assert_eq!(open_column(&engine, 1, 1), vec![4.0]);
    assert!(list_wal_files(temp_dir.path()).unwrap().is_empty());
}

#[test]
fn test_replica_rejects_writes() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .root_dir(temp_dir.path())
        .instance_id(1)
        .replica_of("127.0.0.1:1")
        .retry_backoff(Duration::from_millis(10), 1)
        .max_attempts(Some(1))
        .build();
    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.role(), Role::Replica);

    let err = engine.write_csm(&ohlc_bars(JAN_1_2020, &[1.0]), false).unwrap_err();
    assert!(matches!(err, StoreError::ReplicaReadOnly));
    assert_eq!(engine.replica_count(), 0);
    engine.shutdown().unwrap();
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .root_dir(temp_dir.path())
        .write_queue_capacity(0)
        .build();
    assert!(matches!(Engine::open(config), Err(StoreError::Config(_))));
}
