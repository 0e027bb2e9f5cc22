//! WAL message definitions
//!
//! Every message starts with a one-byte message id. Control message
//! bodies are fixed-size bincode records; TG data is length-prefixed and
//! checksummed.
//!
//! ```text
//! STATUS  (offset 0 only, rewritten in place)
//! ┌─────────┬────────────────┬─────────────────┬────────────────┐
//! │ MID (1) │ FileStatus (4) │ ReplayState (4) │ OwnerID (8)    │
//! └─────────┴────────────────┴─────────────────┴────────────────┘
//! TXNINFO
//! ┌─────────┬───────────┬─────────────────┬────────────┐
//! │ MID (1) │ TGID (8)  │ Destination (4) │ Status (4) │
//! └─────────┴───────────┴─────────────────┴────────────┘
//! TGDATA
//! ┌─────────┬────────────┬───────────────────┬───────────┐
//! │ MID (1) │ TGLen (8)  │ TG bytes (TGLen)  │ CRC32 (4) │
//! └─────────┴────────────┴───────────────────┴───────────┘
//! ```
//!
//! The CRC covers the TGLen field and the TG bytes.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Message id byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    TgData = 0,
    TxnInfo = 1,
    Status = 2,
}

impl MessageId {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(MessageId::TgData),
            1 => Some(MessageId::TxnInfo),
            2 => Some(MessageId::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayState {
    NotReplayed,
    ReplayInProcess,
    Replayed,
}

/// Header record at offset 0 of every WAL file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalStatus {
    pub file_status: FileStatus,
    pub replay_state: ReplayState,
    pub owning_instance_id: i64,
}

impl WalStatus {
    /// Whether the contents may still hold writes missing from primary files
    pub fn needs_replay(&self) -> bool {
        matches!(self.replay_state, ReplayState::NotReplayed | ReplayState::ReplayInProcess)
    }

    /// Open, unreplayed and owned by `instance_id`: the file is live
    pub fn is_active_for(&self, instance_id: i64) -> bool {
        self.file_status == FileStatus::Open
            && self.replay_state == ReplayState::NotReplayed
            && self.owning_instance_id == instance_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    Wal,
    Checkpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    Preparing,
    CommitIntended,
    CommitComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnInfo {
    pub tgid: i64,
    pub destination: Destination,
    pub status: TxnStatus,
}

/// Encoded body sizes (fixed-int bincode)
pub const STATUS_BODY_LEN: usize = 16;
pub const TXNINFO_BODY_LEN: usize = 16;
/// MID + STATUS body: a WAL holding nothing else carries no data
pub const STATUS_MESSAGE_LEN: usize = 1 + STATUS_BODY_LEN;
/// TGDATA framing overhead: MID, length, checksum
pub const TGDATA_OVERHEAD: usize = 1 + 8 + 4;

// =============================================================================
// Encoding
// =============================================================================

pub fn encode_status(status: &WalStatus) -> Result<Vec<u8>> {
    let mut out = vec![MessageId::Status as u8];
    out.extend(bincode::serialize(status)?);
    Ok(out)
}

pub fn encode_txn_info(info: &TxnInfo) -> Result<Vec<u8>> {
    let mut out = vec![MessageId::TxnInfo as u8];
    out.extend(bincode::serialize(info)?);
    Ok(out)
}

pub fn encode_tg_data(tg: &[u8], out: &mut Vec<u8>) {
    let len = (tg.len() as i64).to_le_bytes();
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&len);
    hasher.update(tg);

    out.push(MessageId::TgData as u8);
    out.extend_from_slice(&len);
    out.extend_from_slice(tg);
    out.extend_from_slice(&hasher.finalize().to_le_bytes());
}

// =============================================================================
// Decoding
// =============================================================================

pub fn decode_status(body: &[u8]) -> Result<WalStatus> {
    if body.len() < STATUS_BODY_LEN {
        return Err(StoreError::WalCorruption(format!(
            "short WAL status: {} bytes",
            body.len()
        )));
    }
    bincode::deserialize(&body[..STATUS_BODY_LEN])
        .map_err(|e| StoreError::WalCorruption(format!("bad WAL status: {}", e)))
}

pub fn decode_txn_info(body: &[u8]) -> Result<TxnInfo> {
    if body.len() < TXNINFO_BODY_LEN {
        return Err(StoreError::WalCorruption(format!(
            "short transaction info: {} bytes",
            body.len()
        )));
    }
    bincode::deserialize(&body[..TXNINFO_BODY_LEN])
        .map_err(|e| StoreError::WalCorruption(format!("bad transaction info: {}", e)))
}

/// Checksum over the length field and TG bytes as written by [`encode_tg_data`]
pub fn tg_checksum(len_field: &[u8], tg: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(len_field);
    hasher.update(tg);
    hasher.finalize()
}
