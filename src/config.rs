//! Configuration for tickstore
//!
//! Centralized configuration with sensible defaults. Binaries map their
//! command-line arguments onto [`ConfigBuilder`].

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Main configuration for a tickstore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {root_dir}/
    ///     ├── WALFile.{nanos}.walfile          (write-ahead log segments)
    ///     └── {Symbol}/{Timeframe}/{Format}/   (bucket directories)
    ///           └── {Year}.bin                 (one file per year)
    pub root_dir: PathBuf,

    /// Identity written into every WAL file this instance owns.
    /// Zero means "derive one from the wall clock at open".
    pub instance_id: i64,

    /// Whether this node accepts local writes or mirrors a primary
    pub role: Role,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    pub wal: WalConfig,

    // -------------------------------------------------------------------------
    // Replication Configuration
    // -------------------------------------------------------------------------
    pub replication: ReplicationConfig,
}

/// Node role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts writes and streams committed transaction groups to replicas
    Primary,

    /// Receives transaction groups from a primary; local writes are rejected
    Replica,
}

/// WAL tuning
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// How often buffered writes are committed to the WAL
    pub sync_interval: Duration,

    /// How often dirty primary files are fsynced and a checkpoint written
    pub primary_refresh_interval: Duration,

    /// Rotate the WAL segment after this many checkpoints (0 disables)
    pub rotate_every_checkpoints: u32,

    /// Capacity of the pending write queue; a flush is forced at 80%
    pub write_queue_capacity: usize,

    /// Skip the WAL file and replication, writing primary files directly
    pub bypass: bool,

    /// Run the background sync thread. When false every write commits inline.
    pub background_sync: bool,
}

/// Replication tuning
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Whether the primary runs a replication server
    pub enabled: bool,

    /// Address the primary's replication server listens on
    pub listen_addr: String,

    /// Primary to subscribe to (replicas only)
    pub primary_addr: Option<String>,

    /// Base delay between reconnect attempts
    pub retry_interval: Duration,

    /// Multiplier applied to the delay after every attempt
    pub retry_backoff_coeff: u32,

    /// Give up after this many attempts (None retries forever)
    pub max_attempts: Option<u32>,

    /// Per-replica queue depth on the primary
    pub queue_size: usize,

    /// How long `send` waits on a full replica queue before evicting it
    pub enqueue_timeout: Duration,

    pub connect_timeout: Duration,

    /// A replica treats a silent stream as dead after this long
    pub idle_timeout: Duration,

    /// Heartbeat period on an idle replication stream
    pub heartbeat_interval: Duration,

    /// Number of recent transaction groups kept for reconnecting replicas
    pub backlog_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./tickstore_data"),
            instance_id: 0,
            role: Role::Primary,
            wal: WalConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_millis(500),
            primary_refresh_interval: Duration::from_secs(5),
            rotate_every_checkpoints: 10,
            write_queue_capacity: 10_000,
            bypass: false,
            background_sync: true,
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:5996".to_string(),
            primary_addr: None,
            retry_interval: Duration::from_secs(1),
            retry_backoff_coeff: 2,
            max_attempts: None,
            queue_size: 1_024,
            enqueue_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            backlog_capacity: 4_096,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.wal.write_queue_capacity == 0 {
            return Err(StoreError::Config("write queue capacity must be at least 1".into()));
        }
        if self.wal.sync_interval.is_zero() || self.wal.primary_refresh_interval.is_zero() {
            return Err(StoreError::Config("WAL intervals must be positive".into()));
        }
        let repl = &self.replication;
        if repl.queue_size == 0 {
            return Err(StoreError::Config("replication queue size must be at least 1".into()));
        }
        if repl.retry_backoff_coeff == 0 {
            return Err(StoreError::Config("retry backoff coefficient must be at least 1".into()));
        }
        if self.role == Role::Replica && repl.primary_addr.is_none() {
            return Err(StoreError::Config("a replica needs a primary address".into()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the root data directory
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_dir = path.into();
        self
    }

    pub fn instance_id(mut self, id: i64) -> Self {
        self.config.instance_id = id;
        self
    }

    /// Run as a replica of the primary at `addr`
    pub fn replica_of(mut self, addr: impl Into<String>) -> Self {
        self.config.role = Role::Replica;
        self.config.replication.primary_addr = Some(addr.into());
        self
    }

    /// Set the WAL commit interval
    pub fn wal_sync_interval(mut self, interval: Duration) -> Self {
        self.config.wal.sync_interval = interval;
        self
    }

    /// Set the checkpoint interval
    pub fn primary_refresh_interval(mut self, interval: Duration) -> Self {
        self.config.wal.primary_refresh_interval = interval;
        self
    }

    pub fn rotate_every_checkpoints(mut self, count: u32) -> Self {
        self.config.wal.rotate_every_checkpoints = count;
        self
    }

    pub fn write_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.wal.write_queue_capacity = capacity;
        self
    }

    /// Bypass the WAL and replication entirely
    pub fn wal_bypass(mut self, bypass: bool) -> Self {
        self.config.wal.bypass = bypass;
        self
    }

    /// Enable or disable the background WAL sync thread
    pub fn background_sync(mut self, enabled: bool) -> Self {
        self.config.wal.background_sync = enabled;
        self
    }

    /// Enable the replication server on `addr` (primary only)
    pub fn replication_listen(mut self, addr: impl Into<String>) -> Self {
        self.config.replication.enabled = true;
        self.config.replication.listen_addr = addr.into();
        self
    }

    /// Set the reconnect backoff: `interval * coeff^attempt`
    pub fn retry_backoff(mut self, interval: Duration, coeff: u32) -> Self {
        self.config.replication.retry_interval = interval;
        self.config.replication.retry_backoff_coeff = coeff;
        self
    }

    pub fn max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.config.replication.max_attempts = attempts;
        self
    }

    pub fn replication_queue_size(mut self, size: usize) -> Self {
        self.config.replication.queue_size = size;
        self
    }

    pub fn enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.config.replication.enqueue_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.replication.heartbeat_interval = interval;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.replication.idle_timeout = timeout;
        self
    }

    pub fn backlog_capacity(mut self, capacity: usize) -> Self {
        self.config.replication.backlog_capacity = capacity;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
