//! WAL replay
//!
//! Two passes over a segment:
//!
//! 1. Walk every message after the status header. TG data with a valid
//!    checksum is kept; a completed checkpoint drops every TG at or below
//!    its TGID. The walk stops at the first truncated or malformed
//!    message, which is where a crash cut the file.
//! 2. Apply the surviving TGs to the primary store in TGID order, sync,
//!    and mark the segment replayed. Skipped in verbose (inspect) mode.
//!    A TG whose buckets cannot all be written does not stop the others;
//!    the segment is then left unreplayed and the replay fails with
//!    [`StoreError::PartialWrite`].

use std::collections::BTreeMap;

use super::file::WalFile;
use super::message::{
    decode_txn_info, tg_checksum, Destination, MessageId, ReplayState, TxnStatus,
    STATUS_MESSAGE_LEN, TXNINFO_BODY_LEN,
};
use super::tg::{peek_tgid, TransactionGroup};
use crate::error::{Result, StoreError};
use crate::storage::PrimaryStore;

/// Outcome of replaying one WAL file
#[derive(Debug, Default)]
pub struct ReplayReport {
    /// False when the status header said the file was already replayed
    pub needed: bool,

    /// TG data messages with a valid checksum
    pub valid_groups: usize,

    /// Groups dropped because a checkpoint covered them
    pub checkpointed: usize,

    /// TGIDs applied (or that would be applied in verbose mode), ascending
    pub applied_tgids: Vec<i64>,

    /// Highest completed checkpoint TGID seen (0 = none)
    pub checkpoint_tgid: i64,

    /// Why the walk ended early, if it did
    pub stop_reason: Option<String>,

    /// Per-group summary lines (verbose mode only)
    pub groups: Vec<String>,
}

impl ReplayReport {
    pub fn truncated_tail(&self) -> bool {
        self.stop_reason.is_some()
    }
}

impl WalFile {
    /// Replay this segment into `store`. In verbose mode the file is only
    /// read and summarized.
    pub fn replay(&mut self, verbose: bool, store: &PrimaryStore) -> Result<ReplayReport> {
        let status = self.read_status()?;
        let mut report = ReplayReport {
            needed: status.needs_replay(),
            ..ReplayReport::default()
        };
        if !report.needed && !verbose {
            tracing::debug!(path = %self.path().display(), "WAL file already replayed");
            return Ok(report);
        }

        let bytes = self.read_all()?;
        let pending = scan(&bytes, verbose, &mut report)?;
        report.applied_tgids = pending.keys().copied().collect();

        if let Some(reason) = &report.stop_reason {
            tracing::warn!(path = %self.path().display(), reason = %reason, "WAL replay stopped early");
        }
        if verbose {
            return Ok(report);
        }

        let mut failures: Vec<String> = Vec::new();
        for (tgid, tg_bytes) in &pending {
            let tg = TransactionGroup::parse(tg_bytes)
                .map_err(|e| StoreError::WalCorruption(format!("TG {}: {}", tgid, e)))?;
            match store.write_sets(&tg.sets) {
                Ok(()) => tracing::debug!(tgid, sets = tg.sets.len(), "replayed transaction group"),
                Err(e) => {
                    tracing::error!(tgid, error = %e, "transaction group only partly replayed");
                    failures.push(format!("TG {}: {}", tgid, e));
                }
            }
        }
        store.sync_dirty()?;

        let failed = failures.len();
        if let Some(first) = failures.into_iter().next() {
            return Err(StoreError::PartialWrite {
                failed,
                total: pending.len(),
                first,
            });
        }

        self.write_status(self.status().file_status, ReplayState::Replayed)?;
        tracing::info!(
            path = %self.path().display(),
            applied = report.applied_tgids.len(),
            checkpointed = report.checkpointed,
            "WAL replay complete"
        );
        Ok(report)
    }
}

/// Pass 1: collect uncheckpointed TG data by TGID
fn scan<'a>(bytes: &'a [u8], verbose: bool, report: &mut ReplayReport) -> Result<BTreeMap<i64, &'a [u8]>> {
    let mut groups: BTreeMap<i64, &'a [u8]> = BTreeMap::new();
    let mut pos = STATUS_MESSAGE_LEN;

    while pos < bytes.len() {
        let mid = bytes[pos];
        match MessageId::from_byte(mid) {
            Some(MessageId::TxnInfo) => {
                let body = match bytes.get(pos + 1..pos + 1 + TXNINFO_BODY_LEN) {
                    Some(body) => body,
                    None => {
                        report.stop_reason = Some(format!("truncated transaction info at {}", pos));
                        break;
                    }
                };
                let info = match decode_txn_info(body) {
                    Ok(info) => info,
                    Err(e) => {
                        report.stop_reason = Some(format!("{} at {}", e, pos));
                        break;
                    }
                };
                if info.destination == Destination::Checkpoint && info.status == TxnStatus::CommitComplete {
                    report.checkpoint_tgid = report.checkpoint_tgid.max(info.tgid);
                }
                if verbose {
                    report
                        .groups
                        .push(format!("@{} TXNINFO tgid={} {:?} {:?}", pos, info.tgid, info.destination, info.status));
                }
                pos += 1 + TXNINFO_BODY_LEN;
            }
            Some(MessageId::TgData) => {
                let len_field = match bytes.get(pos + 1..pos + 9) {
                    Some(field) => field,
                    None => {
                        report.stop_reason = Some(format!("truncated TG length at {}", pos));
                        break;
                    }
                };
                let mut word = [0u8; 8];
                word.copy_from_slice(len_field);
                let len = i64::from_le_bytes(word);
                let start = pos + 9;
                let end = usize::try_from(len)
                    .ok()
                    .filter(|len| *len >= 16)
                    .and_then(|len| start.checked_add(len))
                    .filter(|end| end.checked_add(4).map_or(false, |e| e <= bytes.len()));
                let end = match end {
                    Some(end) => end,
                    None => {
                        report.stop_reason = Some(format!("truncated or invalid TG of length {} at {}", len, pos));
                        break;
                    }
                };

                let tg = &bytes[start..end];
                let mut crc = [0u8; 4];
                crc.copy_from_slice(&bytes[end..end + 4]);
                if u32::from_le_bytes(crc) != tg_checksum(len_field, tg) {
                    report.stop_reason = Some(format!("TG checksum mismatch at {}", pos));
                    break;
                }

                let tgid = peek_tgid(tg)?;
                report.valid_groups += 1;
                if groups.insert(tgid, tg).is_some() {
                    return Err(StoreError::WalCorruption(format!("duplicate TGID {} in WAL", tgid)));
                }
                if verbose {
                    report.groups.push(format!("@{} TGDATA tgid={} bytes={}", pos, tgid, len));
                }
                pos = end + 4;
            }
            _ => {
                report.stop_reason = Some(format!("unexpected message id {} at {}", mid, pos));
                break;
            }
        }
    }

    let before = groups.len();
    let checkpoint = report.checkpoint_tgid;
    groups.retain(|tgid, _| *tgid > checkpoint);
    report.checkpointed = before - groups.len();
    Ok(groups)
}
