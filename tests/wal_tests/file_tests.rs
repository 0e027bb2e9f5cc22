//! Tests for WAL Files
//!
//! These tests verify:
//! - New segments are named and stamped with an Open status
//! - Appends frame each TG between prepare and commit records
//! - Only the owning instance may append
//! - Close, take-over and delete move the status header correctly

use std::fs;

use tempfile::TempDir;
use tickstore::wal::{
    FileStatus, MessageId, ReplayState, WalFile, STATUS_MESSAGE_LEN, TGDATA_OVERHEAD,
    WAL_FILE_PREFIX, WAL_FILE_SUFFIX,
};
use tickstore::StoreError;

use super::tg_bytes;

const TXNINFO_MESSAGE_LEN: u64 = 17;

// =============================================================================
// Creation Tests
// =============================================================================

#[test]
fn test_create_names_and_stamps_segment() {
    let temp = TempDir::new().unwrap();
    let wal = WalFile::create(temp.path(), 42).unwrap();

    let name = wal.path().file_name().unwrap().to_str().unwrap().to_string();
    assert!(name.starts_with(WAL_FILE_PREFIX));
    assert!(name.ends_with(WAL_FILE_SUFFIX));
    assert!(WalFile::is_wal_file(wal.path()));

    let status = wal.status();
    assert_eq!(status.file_status, FileStatus::Open);
    assert_eq!(status.replay_state, ReplayState::NotReplayed);
    assert_eq!(status.owning_instance_id, 42);
    assert_eq!(wal.len().unwrap(), STATUS_MESSAGE_LEN as u64);
    assert!(wal.is_empty().unwrap());
}

#[test]
fn test_two_segments_never_share_a_name() {
    let temp = TempDir::new().unwrap();
    let a = WalFile::create(temp.path(), 1).unwrap();
    let b = WalFile::create(temp.path(), 1).unwrap();
    assert_ne!(a.path(), b.path());
}

#[test]
fn test_other_files_are_not_wal_files() {
    let temp = TempDir::new().unwrap();
    assert!(!WalFile::is_wal_file(&temp.path().join("WALFile.1.walfile.tmp")));
    assert!(!WalFile::is_wal_file(&temp.path().join("2020.bin")));
}

// =============================================================================
// Append Tests
// =============================================================================

#[test]
fn test_append_frames_tg_with_prepare_and_commit() {
    let temp = TempDir::new().unwrap();
    let mut wal = WalFile::create(temp.path(), 1).unwrap();
    let tg = tg_bytes(100, 1, 7);
    wal.append(1, &tg).unwrap();

    let expected = STATUS_MESSAGE_LEN as u64 + TXNINFO_MESSAGE_LEN * 2 + (TGDATA_OVERHEAD + tg.len()) as u64;
    assert_eq!(wal.len().unwrap(), expected);
    assert_eq!(wal.last_committed_tgid(), 100);

    let bytes = wal.read_all().unwrap();
    assert_eq!(MessageId::from_byte(bytes[0]), Some(MessageId::Status));
    assert_eq!(MessageId::from_byte(bytes[STATUS_MESSAGE_LEN]), Some(MessageId::TxnInfo));
    let data_at = STATUS_MESSAGE_LEN + TXNINFO_MESSAGE_LEN as usize;
    assert_eq!(MessageId::from_byte(bytes[data_at]), Some(MessageId::TgData));
    assert_eq!(&bytes[data_at + 1..data_at + 9], &(tg.len() as i64).to_le_bytes());
}

#[test]
fn test_foreign_instance_cannot_append() {
    let temp = TempDir::new().unwrap();
    let mut wal = WalFile::create(temp.path(), 1).unwrap();
    let err = wal.append(2, &tg_bytes(1, 1, 1)).unwrap_err();
    assert!(matches!(err, StoreError::WalOwnership { owner: 1, .. }));
    assert!(wal.is_empty().unwrap());
}

#[test]
fn test_closed_segment_rejects_appends() {
    let temp = TempDir::new().unwrap();
    let mut wal = WalFile::create(temp.path(), 1).unwrap();
    wal.close(ReplayState::Replayed).unwrap();
    assert!(wal.append(1, &tg_bytes(1, 1, 1)).is_err());
}

#[test]
fn test_read_only_handle_never_writes() {
    let temp = TempDir::new().unwrap();
    let path = WalFile::create(temp.path(), 1).unwrap().path().to_path_buf();

    let mut wal = WalFile::open_read_only(&path).unwrap();
    assert_eq!(wal.status().owning_instance_id, 1);
    assert!(!wal.can_write(1).unwrap());
    assert!(wal.append(1, &tg_bytes(1, 1, 1)).is_err());
    assert!(wal.write_status(FileStatus::Closed, ReplayState::Replayed).is_err());
}

// =============================================================================
// Status Lifecycle Tests
// =============================================================================

#[test]
fn test_close_persists_status() {
    let temp = TempDir::new().unwrap();
    let mut wal = WalFile::create(temp.path(), 1).unwrap();
    wal.close(ReplayState::Replayed).unwrap();

    let reopened = WalFile::open_read_only(wal.path()).unwrap();
    assert_eq!(reopened.status().file_status, FileStatus::Closed);
    assert_eq!(reopened.status().replay_state, ReplayState::Replayed);
}

#[test]
fn test_take_over_marks_replay_in_process() {
    let temp = TempDir::new().unwrap();
    let path = WalFile::create(temp.path(), 1).unwrap().path().to_path_buf();

    let wal = WalFile::take_over(&path, 2).unwrap();
    assert_eq!(wal.status().owning_instance_id, 2);
    assert_eq!(wal.status().replay_state, ReplayState::ReplayInProcess);

    let on_disk = WalFile::open_read_only(&path).unwrap().status();
    assert_eq!(on_disk.owning_instance_id, 2);
    assert_eq!(on_disk.replay_state, ReplayState::ReplayInProcess);
}

#[test]
fn test_take_over_of_replayed_file_keeps_state() {
    let temp = TempDir::new().unwrap();
    let mut old = WalFile::create(temp.path(), 1).unwrap();
    old.close(ReplayState::Replayed).unwrap();

    let wal = WalFile::take_over(old.path(), 2).unwrap();
    assert_eq!(wal.status().replay_state, ReplayState::Replayed);
}

#[test]
fn test_delete_refuses_unreplayed_file() {
    let temp = TempDir::new().unwrap();
    let path = WalFile::create(temp.path(), 1).unwrap().path().to_path_buf();

    let wal = WalFile::take_over(&path, 2).unwrap();
    assert!(wal.delete(2).is_err());
    assert!(path.exists());
}

#[test]
fn test_delete_removes_replayed_file() {
    let temp = TempDir::new().unwrap();
    let mut wal = WalFile::create(temp.path(), 1).unwrap();
    let path = wal.path().to_path_buf();
    wal.close(ReplayState::Replayed).unwrap();
    wal.delete(1).unwrap();
    assert!(!path.exists());
}

#[test]
fn test_file_without_status_is_corrupt() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("WALFile.5.walfile");
    fs::write(&path, b"not a wal").unwrap();
    let err = WalFile::open_read_only(&path).err().unwrap();
    assert!(matches!(err, StoreError::WalCorruption(_)));
}
