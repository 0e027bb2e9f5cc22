//! # tickstore
//!
//! Durable time-series bucket storage with:
//! - Fixed- and variable-length records in pre-sized yearly bucket files
//! - Write-Ahead Logging (WAL) of transaction groups with crash replay
//! - Log-shipping replication from a primary to read-only replicas
//! - Chunked integrity checksums for comparing copies
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Engine::write_csm                           │
//! │          (ColumnSeriesMap → per-interval WTSets)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 Transaction pipe                             │
//! │         (bounded queue, flushed by the sync thread)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ one TG per flush
//!          ┌────────────┼─────────────────────┐
//!          │            │                     │
//!          ▼            ▼                     ▼
//!   ┌─────────────┐ ┌─────────────┐   ┌──────────────┐
//!   │     WAL     │ │ Replication │   │ Primary files│
//!   │  (Append)   │ │   Sender    │   │ {Sym}/{TF}/  │
//!   └─────────────┘ └──────┬──────┘   │ {Fmt}/{Y}.bin│
//!                          │ TCP      └──────────────┘
//!                          ▼
//!                   Replica: Receiver → Replayer → Engine writer
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod shutdown;

pub mod codec;
pub mod storage;
pub mod wal;
pub mod writer;
pub mod replication;
pub mod integrity;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorClass, Result, StoreError};
pub use config::{Config, Role};
pub use engine::Engine;
pub use shutdown::CancelToken;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of tickstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
