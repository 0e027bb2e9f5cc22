//! WAL file handle
//!
//! One `WALFile.{unix_nanos}.walfile` segment in the data root. The
//! segment is owned by the instance recorded in its status header; only
//! the owner appends to it.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::message::{
    decode_status, encode_status, encode_tg_data, encode_txn_info, Destination, FileStatus,
    MessageId, ReplayState, TxnInfo, TxnStatus, WalStatus, STATUS_MESSAGE_LEN,
};
use super::tg::peek_tgid;
use crate::error::{Result, StoreError};
use crate::storage::PrimaryStore;

pub const WAL_FILE_PREFIX: &str = "WALFile.";
pub const WAL_FILE_SUFFIX: &str = ".walfile";

pub struct WalFile {
    path: PathBuf,
    file: File,
    status: WalStatus,
    writable: bool,

    /// Highest TGID appended since the last checkpoint (0 = none)
    last_committed_tgid: i64,
}

impl WalFile {
    // =========================================================================
    // Opening
    // =========================================================================

    /// Create a fresh segment owned by `instance_id`
    pub fn create(root: &Path, instance_id: i64) -> Result<Self> {
        fs::create_dir_all(root)?;
        let mut nanos = now_nanos();
        let (path, file) = loop {
            let path = root.join(format!("{}{}{}", WAL_FILE_PREFIX, nanos, WAL_FILE_SUFFIX));
            match OpenOptions::new().read(true).write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => nanos += 1,
                Err(e) => {
                    return Err(StoreError::WalWrite(format!(
                        "cannot create WAL file in {}: {}",
                        root.display(),
                        e
                    )))
                }
            }
        };

        let mut wal = Self {
            path,
            file,
            status: WalStatus {
                file_status: FileStatus::Open,
                replay_state: ReplayState::NotReplayed,
                owning_instance_id: instance_id,
            },
            writable: true,
            last_committed_tgid: 0,
        };
        wal.write_status(FileStatus::Open, ReplayState::NotReplayed)?;
        tracing::info!(path = %wal.path.display(), instance_id, "created WAL file");
        Ok(wal)
    }

    /// Claim a foreign segment for replay during startup cleanup
    pub fn take_over(path: &Path, instance_id: i64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut wal = Self {
            path: path.to_path_buf(),
            file,
            status: WalStatus {
                file_status: FileStatus::Open,
                replay_state: ReplayState::NotReplayed,
                owning_instance_id: instance_id,
            },
            writable: true,
            last_committed_tgid: 0,
        };
        let previous = wal.read_status()?;
        tracing::info!(
            path = %path.display(),
            previous_owner = previous.owning_instance_id,
            instance_id,
            "taking over WAL file"
        );
        let state = if previous.needs_replay() {
            ReplayState::ReplayInProcess
        } else {
            previous.replay_state
        };
        wal.status.owning_instance_id = instance_id;
        wal.write_status(FileStatus::Open, state)?;
        Ok(wal)
    }

    /// Open any segment for inspection; nothing is ever written
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut wal = Self {
            path: path.to_path_buf(),
            file,
            status: WalStatus {
                file_status: FileStatus::Closed,
                replay_state: ReplayState::Replayed,
                owning_instance_id: 0,
            },
            writable: false,
            last_committed_tgid: 0,
        };
        wal.read_status()?;
        Ok(wal)
    }

    pub fn is_wal_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(WAL_FILE_PREFIX) && n.ends_with(WAL_FILE_SUFFIX))
            .unwrap_or(false)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> WalStatus {
        self.status
    }

    pub fn last_committed_tgid(&self) -> i64 {
        self.last_committed_tgid
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? <= STATUS_MESSAGE_LEN as u64)
    }

    /// Read the whole segment
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Re-read the status header from disk
    pub fn read_status(&mut self) -> Result<WalStatus> {
        let mut buf = [0u8; STATUS_MESSAGE_LEN];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut buf).map_err(|e| {
            StoreError::WalCorruption(format!("{}: unreadable status: {}", self.path.display(), e))
        })?;
        if MessageId::from_byte(buf[0]) != Some(MessageId::Status) {
            return Err(StoreError::WalCorruption(format!(
                "{}: file does not start with a status message",
                self.path.display()
            )));
        }
        self.status = decode_status(&buf[1..])?;
        Ok(self.status)
    }

    /// Rewrite the status header in place and fsync
    pub fn write_status(&mut self, file_status: FileStatus, replay_state: ReplayState) -> Result<()> {
        self.ensure_writable()?;
        self.status.file_status = file_status;
        self.status.replay_state = replay_state;
        let bytes = encode_status(&self.status)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        self.file.sync_all()?;
        self.file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    /// Whether `instance_id` may append to this segment right now
    pub fn can_write(&mut self, instance_id: i64) -> Result<bool> {
        Ok(self.writable && self.read_status()?.is_active_for(instance_id))
    }

    // =========================================================================
    // Appends
    // =========================================================================

    /// Durably append one serialized transaction group.
    ///
    /// The prepare record, the data and the commit record go out in one
    /// write followed by an fsync. On any failure the file is cut back to
    /// its previous length.
    pub fn append(&mut self, instance_id: i64, tg: &[u8]) -> Result<()> {
        if !self.can_write(instance_id)? {
            return Err(StoreError::WalOwnership {
                path: self.path.display().to_string(),
                owner: self.status.owning_instance_id,
            });
        }
        let tgid = peek_tgid(tg)?;

        let mut buf = Vec::with_capacity(tg.len() + 64);
        buf.extend(encode_txn_info(&TxnInfo {
            tgid,
            destination: Destination::Wal,
            status: TxnStatus::Preparing,
        })?);
        encode_tg_data(tg, &mut buf);
        buf.extend(encode_txn_info(&TxnInfo {
            tgid,
            destination: Destination::Wal,
            status: TxnStatus::CommitComplete,
        })?);

        let before = self.file.seek(SeekFrom::End(0))?;
        let written = self
            .file
            .write_all(&buf)
            .and_then(|_| self.file.sync_data());
        if let Err(e) = written {
            tracing::error!(path = %self.path.display(), tgid, error = %e, "WAL append failed, truncating");
            if let Err(trunc) = self.file.set_len(before) {
                tracing::error!(error = %trunc, "failed to truncate WAL after failed append");
            }
            let _ = self.file.seek(SeekFrom::End(0));
            return Err(StoreError::WalWrite(format!("append of TG {} failed: {}", tgid, e)));
        }

        self.last_committed_tgid = tgid;
        Ok(())
    }

    /// Make every primary write so far durable and record the checkpoint.
    ///
    /// Returns false when nothing was committed since the last checkpoint.
    pub fn checkpoint(&mut self, store: &PrimaryStore) -> Result<bool> {
        let tgid = self.last_committed_tgid;
        if tgid == 0 {
            return Ok(false);
        }
        self.ensure_writable()?;

        self.write_txn_info(tgid, Destination::Checkpoint, TxnStatus::Preparing)?;
        let synced = store.sync_dirty()?;
        self.write_txn_info(tgid, Destination::Checkpoint, TxnStatus::CommitComplete)?;
        self.file.sync_data()?;

        tracing::debug!(tgid, files = synced, "WAL checkpoint complete");
        self.last_committed_tgid = 0;
        Ok(true)
    }

    fn write_txn_info(&mut self, tgid: i64, destination: Destination, status: TxnStatus) -> Result<()> {
        let bytes = encode_txn_info(&TxnInfo {
            tgid,
            destination,
            status,
        })?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }

    // =========================================================================
    // Closing
    // =========================================================================

    /// Mark the segment closed
    pub fn close(&mut self, replay_state: ReplayState) -> Result<()> {
        if self.writable {
            self.write_status(FileStatus::Closed, replay_state)?;
        }
        Ok(())
    }

    /// Remove a segment that holds nothing left to replay.
    ///
    /// Refused for the caller's live segment and for anything that still
    /// needs replay.
    pub fn delete(mut self, instance_id: i64) -> Result<()> {
        let status = self.read_status()?;
        if status.is_active_for(instance_id) {
            return Err(StoreError::WalWrite(format!(
                "refusing to delete active WAL file {}",
                self.path.display()
            )));
        }
        if status.needs_replay() {
            return Err(StoreError::WalWrite(format!(
                "WAL file {} needs replay, cannot delete",
                self.path.display()
            )));
        }
        let path = self.path.clone();
        if self.writable && status.file_status == FileStatus::Open {
            self.close(ReplayState::Replayed)?;
        }
        fs::remove_file(&path)?;
        tracing::info!(path = %path.display(), "deleted WAL file");
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(StoreError::WalWrite(format!(
                "{} was opened read-only",
                self.path.display()
            )))
        }
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
