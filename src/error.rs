//! Error types for tickstore
//!
//! Provides a unified error type for all operations, plus a coarse
//! classification used by the replication retry loop.

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for tickstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Schema mismatch for {key}: {reason}")]
    SchemaMismatch { key: String, reason: String },

    #[error("Invalid bucket key: {0}")]
    InvalidKey(String),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    #[error("WAL file {path} is owned by instance {owner}")]
    WalOwnership { path: String, owner: i64 },

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    /// Some writes of a batch failed; the rest were applied
    #[error("{failed} of {total} writes failed, first: {first}")]
    PartialWrite { failed: usize, total: usize, first: String },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // -------------------------------------------------------------------------
    // Replication Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Replay of transaction group {tgid} rejected: {reason}")]
    ReplayRejected { tgid: i64, reason: String },

    #[error("Instance is a replica and does not accept local writes")]
    ReplicaReadOnly,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------
    #[error("Operation cancelled")]
    Cancelled,
}

/// Whether an operation that failed with an error may be attempted again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

impl StoreError {
    /// Classify the error for retry decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::Transport(_) | StoreError::ReplayRejected { .. } => ErrorClass::Retryable,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Wrap an I/O failure on a network stream as a transport error
    pub fn transport(err: impl std::fmt::Display) -> Self {
        StoreError::Transport(err.to_string())
    }
}
