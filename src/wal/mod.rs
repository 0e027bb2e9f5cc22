//! Write-Ahead Log (WAL) Module
//!
//! Provides durability for committed transaction groups before they reach
//! the primary bucket files.
//!
//! ## Responsibilities
//! - Drain queued writes into transaction groups (TGs)
//! - Append each TG with prepare/commit records and a CRC32
//! - Checkpoint once primary files are fsynced
//! - Replay uncheckpointed TGs left by a crashed instance
//!
//! ## File Format
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ STATUS (rewritten in place)                │
//! ├────────────────────────────────────────────┤
//! │ TXNINFO  tgid  Wal  Preparing              │
//! │ TGDATA   len   TG bytes   CRC32            │
//! │ TXNINFO  tgid  Wal  CommitComplete         │
//! ├────────────────────────────────────────────┤
//! │ ...                                        │
//! ├────────────────────────────────────────────┤
//! │ TXNINFO  tgid  Checkpoint  Preparing       │
//! │ TXNINFO  tgid  Checkpoint  CommitComplete  │
//! └────────────────────────────────────────────┘
//! ```

mod cleaner;
mod file;
mod message;
mod replay;
mod sync;
mod tg;

pub use cleaner::{cleanup_old_wal_files, list_wal_files, CleanupReport};
pub use file::{WalFile, WAL_FILE_PREFIX, WAL_FILE_SUFFIX};
pub use message::{
    Destination, FileStatus, MessageId, ReplayState, TxnInfo, TxnStatus, WalStatus,
    STATUS_MESSAGE_LEN, TGDATA_OVERHEAD,
};
pub use replay::ReplayReport;
pub use sync::Wal;
pub use tg::{peek_tgid, OffsetIndexBuffer, TransactionGroup, WTSet};
