//! Tests for WAL Replay
//!
//! These tests verify:
//! - Committed TGs are applied to primary files in TGID order
//! - A file cut mid-TG recovers every TG before the cut
//! - Checksum damage stops the walk at the damaged TG
//! - TGs covered by a completed checkpoint are skipped
//! - Replay marks the file replayed and is safe to repeat
//! - A TG that cannot be fully written does not stop the TGs after it
//! - Verbose replay only reports

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tickstore::codec::ColumnData;
use tickstore::storage::PrimaryStore;
use tickstore::wal::{ReplayState, TransactionGroup, WalFile};
use tickstore::StoreError;

use super::{out_of_year_set, tg_bytes, value_key, value_set};

// =============================================================================
// Helper Functions
// =============================================================================

/// A crashed segment owned by instance 1 holding one TG per value; returns
/// the file length after each append
fn write_crashed_wal(root: &Path, values: &[i64]) -> (PathBuf, Vec<u64>) {
    let mut wal = WalFile::create(root, 1).unwrap();
    let mut lengths = Vec::new();
    for (i, value) in values.iter().enumerate() {
        let day = i as i64 + 1;
        wal.append(1, &tg_bytes(day * 10, day, *value)).unwrap();
        lengths.push(wal.len().unwrap());
    }
    (wal.path().to_path_buf(), lengths)
}

fn stored_values(store: &PrimaryStore) -> Vec<i64> {
    let series = store.read_range(&value_key(), 2020, 1, 31).unwrap();
    match series.column("V") {
        Some(ColumnData::Int64(v)) => v.clone(),
        other => panic!("unexpected V column: {:?}", other),
    }
}

fn bucket_exists(root: &Path) -> bool {
    value_key().year_file(root, 2020).exists()
}

// =============================================================================
// Clean Replay Tests
// =============================================================================

#[test]
fn test_replay_applies_all_committed_groups() {
    let temp = TempDir::new().unwrap();
    let (path, _) = write_crashed_wal(temp.path(), &[11, 22, 33]);
    let store = PrimaryStore::new(temp.path());

    let mut wal = WalFile::take_over(&path, 2).unwrap();
    let report = wal.replay(false, &store).unwrap();

    assert!(report.needed);
    assert_eq!(report.valid_groups, 3);
    assert_eq!(report.applied_tgids, vec![10, 20, 30]);
    assert!(!report.truncated_tail());
    assert_eq!(stored_values(&store), vec![11, 22, 33]);
    assert_eq!(wal.status().replay_state, ReplayState::Replayed);
}

#[test]
fn test_replay_of_empty_segment_applies_nothing() {
    let temp = TempDir::new().unwrap();
    let (path, _) = write_crashed_wal(temp.path(), &[]);
    let store = PrimaryStore::new(temp.path());

    let mut wal = WalFile::take_over(&path, 2).unwrap();
    let report = wal.replay(false, &store).unwrap();
    assert!(report.applied_tgids.is_empty());
    assert!(!bucket_exists(temp.path()));
}

#[test]
fn test_second_replay_is_not_needed() {
    let temp = TempDir::new().unwrap();
    let (path, _) = write_crashed_wal(temp.path(), &[5]);
    let store = PrimaryStore::new(temp.path());

    let mut wal = WalFile::take_over(&path, 2).unwrap();
    wal.replay(false, &store).unwrap();
    let again = wal.replay(false, &store).unwrap();
    assert!(!again.needed);
    assert!(again.applied_tgids.is_empty());
}

#[test]
fn test_replaying_same_groups_twice_leaves_files_unchanged() {
    let temp = TempDir::new().unwrap();
    let (path, _) = write_crashed_wal(temp.path(), &[1, 2, 3]);
    let copy = temp.path().join("WALFile.1.walfile");
    fs::copy(&path, &copy).unwrap();
    let store = PrimaryStore::new(temp.path());

    WalFile::take_over(&path, 2).unwrap().replay(false, &store).unwrap();
    let bucket = value_key().year_file(temp.path(), 2020);
    let first = fs::read(&bucket).unwrap();

    WalFile::take_over(&copy, 2).unwrap().replay(false, &store).unwrap();
    assert_eq!(fs::read(&bucket).unwrap(), first);
}

#[test]
fn test_unwritable_group_does_not_stop_later_groups() {
    let temp = TempDir::new().unwrap();
    let mut crashed = WalFile::create(temp.path(), 1).unwrap();
    crashed.append(1, &tg_bytes(10, 1, 11)).unwrap();
    let mixed = TransactionGroup::new(20, vec![out_of_year_set(), value_set(2, 22)]);
    crashed.append(1, &mixed.serialize().unwrap()).unwrap();
    crashed.append(1, &tg_bytes(30, 3, 33)).unwrap();
    let path = crashed.path().to_path_buf();
    drop(crashed);

    let store = PrimaryStore::new(temp.path());
    let mut wal = WalFile::take_over(&path, 2).unwrap();
    let err = wal.replay(false, &store).unwrap_err();

    assert!(matches!(err, StoreError::PartialWrite { failed: 1, total: 3, .. }));
    assert_eq!(stored_values(&store), vec![11, 22, 33]);
    assert!(wal.read_status().unwrap().needs_replay());
}

// =============================================================================
// Damaged File Tests
// =============================================================================

#[test]
fn test_truncated_tail_recovers_preceding_groups() {
    let temp = TempDir::new().unwrap();
    let (path, lengths) = write_crashed_wal(temp.path(), &[100, 200, 300]);

    // Cut the third TG in half
    let cut = (lengths[1] + lengths[2]) / 2;
    OpenOptions::new().write(true).open(&path).unwrap().set_len(cut).unwrap();

    let store = PrimaryStore::new(temp.path());
    let mut wal = WalFile::take_over(&path, 2).unwrap();
    let report = wal.replay(false, &store).unwrap();

    assert!(report.truncated_tail());
    assert_eq!(report.applied_tgids, vec![10, 20]);
    assert_eq!(stored_values(&store), vec![100, 200]);
}

#[test]
fn test_every_cut_point_recovers_a_prefix() {
    let temp = TempDir::new().unwrap();
    let (path, lengths) = write_crashed_wal(temp.path(), &[1, 2]);
    let full = fs::read(&path).unwrap();

    for cut in (lengths[0] as usize..full.len()).step_by(7) {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("WALFile.9.walfile");
        fs::write(&target, &full[..cut]).unwrap();

        let store = PrimaryStore::new(dir.path());
        let report = WalFile::take_over(&target, 2).unwrap().replay(false, &store).unwrap();
        assert!(report.applied_tgids == vec![10] || report.applied_tgids == vec![10, 20], "cut at {}", cut);
        assert_eq!(stored_values(&store)[0], 1);
    }
}

#[test]
fn test_checksum_damage_stops_at_damaged_group() {
    let temp = TempDir::new().unwrap();
    let (path, lengths) = write_crashed_wal(temp.path(), &[7, 8, 9]);

    // Flip the last byte of the second TG's payload, just before its CRC
    let mut bytes = fs::read(&path).unwrap();
    let second_commit = lengths[1] as usize - 17;
    bytes[second_commit - 5] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let store = PrimaryStore::new(temp.path());
    let report = WalFile::take_over(&path, 2).unwrap().replay(false, &store).unwrap();
    assert_eq!(report.applied_tgids, vec![10]);
    assert!(report.stop_reason.unwrap().contains("checksum"));
}

#[test]
fn test_trailing_garbage_is_ignored() {
    let temp = TempDir::new().unwrap();
    let (path, _) = write_crashed_wal(temp.path(), &[4]);
    let mut bytes = fs::read(&path).unwrap();
    bytes.extend_from_slice(&[0xEE; 32]);
    fs::write(&path, &bytes).unwrap();

    let store = PrimaryStore::new(temp.path());
    let report = WalFile::take_over(&path, 2).unwrap().replay(false, &store).unwrap();
    assert_eq!(report.applied_tgids, vec![10]);
    assert!(report.truncated_tail());
}

#[test]
fn test_duplicate_tgid_is_corruption() {
    let temp = TempDir::new().unwrap();
    let mut wal = WalFile::create(temp.path(), 1).unwrap();
    wal.append(1, &tg_bytes(10, 1, 1)).unwrap();
    wal.append(1, &tg_bytes(10, 2, 2)).unwrap();
    let path = wal.path().to_path_buf();
    drop(wal);

    let store = PrimaryStore::new(temp.path());
    let err = WalFile::take_over(&path, 2).unwrap().replay(false, &store).unwrap_err();
    assert!(matches!(err, StoreError::WalCorruption(_)));
}

// =============================================================================
// Checkpoint Tests
// =============================================================================

#[test]
fn test_checkpointed_groups_are_skipped() {
    let temp = TempDir::new().unwrap();
    let store = PrimaryStore::new(temp.path());
    let mut wal = WalFile::create(temp.path(), 1).unwrap();
    wal.append(1, &tg_bytes(10, 1, 1)).unwrap();
    wal.append(1, &tg_bytes(20, 2, 2)).unwrap();
    assert!(wal.checkpoint(&store).unwrap());
    assert_eq!(wal.last_committed_tgid(), 0);
    assert!(!wal.checkpoint(&store).unwrap());
    wal.append(1, &tg_bytes(30, 3, 3)).unwrap();
    let path = wal.path().to_path_buf();
    drop(wal);

    let fresh = TempDir::new().unwrap();
    let target = fresh.path().join(path.file_name().unwrap());
    fs::copy(&path, &target).unwrap();
    let fresh_store = PrimaryStore::new(fresh.path());
    let report = WalFile::take_over(&target, 2).unwrap().replay(false, &fresh_store).unwrap();

    assert_eq!(report.checkpoint_tgid, 20);
    assert_eq!(report.checkpointed, 2);
    assert_eq!(report.applied_tgids, vec![30]);
    let series = fresh_store.read_range(&value_key(), 2020, 1, 31).unwrap();
    assert_eq!(series.epoch().unwrap().len(), 1);
}

// =============================================================================
// Verbose Mode Tests
// =============================================================================

#[test]
fn test_verbose_replay_reports_without_writing() {
    let temp = TempDir::new().unwrap();
    let (path, _) = write_crashed_wal(temp.path(), &[1, 2]);
    let before = fs::read(&path).unwrap();

    let store = PrimaryStore::new(temp.path());
    let mut wal = WalFile::open_read_only(&path).unwrap();
    let report = wal.replay(true, &store).unwrap();

    assert_eq!(report.applied_tgids, vec![10, 20]);
    assert_eq!(report.groups.len(), 6);
    assert!(!bucket_exists(temp.path()));
    assert_eq!(fs::read(&path).unwrap(), before);
}
