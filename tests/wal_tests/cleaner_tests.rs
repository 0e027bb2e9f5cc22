//! Tests for Startup WAL Cleanup
//!
//! These tests verify:
//! - Crashed segments are replayed and removed
//! - Cleanly closed segments are removed without replay
//! - Untrustworthy segments are moved aside, not deleted
//! - Segments with unwritable groups are applied as far as possible, then
//!   moved aside without blocking startup
//! - The caller's live segment is left alone

use std::fs;

use tempfile::TempDir;
use tickstore::storage::PrimaryStore;
use tickstore::wal::{cleanup_old_wal_files, list_wal_files, ReplayState, TransactionGroup, WalFile};

use super::{out_of_year_set, tg_bytes, value_key, value_set};

// =============================================================================
// Cleanup Tests
// =============================================================================

#[test]
fn test_list_returns_only_wal_files_in_order() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("WALFile.2.walfile"), b"").unwrap();
    fs::write(temp.path().join("WALFile.1.walfile"), b"").unwrap();
    fs::write(temp.path().join("WALFile.3.walfile.tmp"), b"").unwrap();
    fs::write(temp.path().join("notes.txt"), b"").unwrap();

    let names: Vec<String> = list_wal_files(temp.path())
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["WALFile.1.walfile", "WALFile.2.walfile"]);
}

#[test]
fn test_crashed_segment_is_replayed_then_removed() {
    let temp = TempDir::new().unwrap();
    let mut crashed = WalFile::create(temp.path(), 1).unwrap();
    crashed.append(1, &tg_bytes(10, 4, 44)).unwrap();
    let path = crashed.path().to_path_buf();
    drop(crashed);

    let store = PrimaryStore::new(temp.path());
    let report = cleanup_old_wal_files(temp.path(), None, 2, &store).unwrap();

    assert_eq!(report.replayed, vec![path.clone()]);
    assert!(!path.exists());
    let series = store.read_range(&value_key(), 2020, 4, 4).unwrap();
    assert_eq!(series.len(), 1);
}

#[test]
fn test_closed_segment_is_removed_without_replay() {
    let temp = TempDir::new().unwrap();
    let mut old = WalFile::create(temp.path(), 1).unwrap();
    old.append(1, &tg_bytes(10, 1, 1)).unwrap();
    old.close(ReplayState::Replayed).unwrap();
    let path = old.path().to_path_buf();
    drop(old);

    let store = PrimaryStore::new(temp.path());
    let report = cleanup_old_wal_files(temp.path(), None, 2, &store).unwrap();

    assert_eq!(report.removed, vec![path.clone()]);
    assert!(report.replayed.is_empty());
    assert!(!path.exists());
    assert!(!value_key().year_file(temp.path(), 2020).exists());
}

#[test]
fn test_corrupt_segment_is_moved_aside() {
    let temp = TempDir::new().unwrap();
    let mut bad = WalFile::create(temp.path(), 1).unwrap();
    bad.append(1, &tg_bytes(10, 1, 1)).unwrap();
    bad.append(1, &tg_bytes(10, 2, 2)).unwrap();
    let path = bad.path().to_path_buf();
    drop(bad);

    let store = PrimaryStore::new(temp.path());
    let report = cleanup_old_wal_files(temp.path(), None, 2, &store).unwrap();

    assert_eq!(report.quarantined.len(), 1);
    assert!(!path.exists());
    assert!(report.quarantined[0].exists());
    assert!(list_wal_files(temp.path()).unwrap().is_empty());
}

#[test]
fn test_segment_with_unwritable_group_is_applied_then_moved_aside() {
    let temp = TempDir::new().unwrap();
    let mut crashed = WalFile::create(temp.path(), 1).unwrap();
    let mixed = TransactionGroup::new(10, vec![out_of_year_set(), value_set(4, 44)]);
    crashed.append(1, &mixed.serialize().unwrap()).unwrap();
    let path = crashed.path().to_path_buf();
    drop(crashed);

    let store = PrimaryStore::new(temp.path());
    let report = cleanup_old_wal_files(temp.path(), None, 2, &store).unwrap();

    assert_eq!(report.quarantined, vec![temp.path().join(format!(
        "{}.tmp",
        path.file_name().unwrap().to_string_lossy()
    ))]);
    assert!(!path.exists());
    assert!(list_wal_files(temp.path()).unwrap().is_empty());
    let series = store.read_range(&value_key(), 2020, 4, 4).unwrap();
    assert_eq!(series.len(), 1);
}

#[test]
fn test_live_segment_is_skipped() {
    let temp = TempDir::new().unwrap();
    let mut mine = WalFile::create(temp.path(), 7).unwrap();
    mine.append(7, &tg_bytes(10, 1, 1)).unwrap();

    let store = PrimaryStore::new(temp.path());
    let report = cleanup_old_wal_files(temp.path(), Some(mine.path()), 7, &store).unwrap();

    assert!(report.removed.is_empty() && report.replayed.is_empty());
    assert!(mine.path().exists());
    mine.append(7, &tg_bytes(20, 2, 2)).unwrap();
}
