//! Engine Module
//!
//! Owns every component of a running instance and the threads that drive
//! them.
//!
//! ## Responsibilities
//! - Replay WAL files left by earlier instances before accepting writes
//! - Start the WAL sync thread
//! - Primary: run the replication server
//! - Replica: run the receive loop under the retryer
//! - Shut everything down in order
//!
//! ## Startup
//! ```text
//! validate config ─► cleanup old WAL files ─► open WAL ─► spawn threads
//! ```

use std::fs;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::codec::{ColumnSeries, ColumnSeriesMap, TimeBucketKey};
use crate::config::{Config, Role};
use crate::error::{Result, StoreError};
use crate::replication::{
    Backoff, NopReplicationSender, ReplicationSender, ReplicationServer, Receiver, Replayer,
    Retryer, Sender, TcpStreamClient,
};
use crate::shutdown::CancelToken;
use crate::storage::PrimaryStore;
use crate::wal::{cleanup_old_wal_files, Wal};
use crate::writer::{CsmWriter, Writer};

/// A running tickstore instance
///
/// ## Threads
/// - `wal-sync`: timed flushes, checkpoints and rotation
/// - `replication-accept` (+ one per replica): primary only
/// - `replication-receiver`: replica only
///
/// All of them stop on the engine's cancel token.
pub struct Engine {
    config: Config,
    instance_id: i64,
    store: Arc<PrimaryStore>,
    wal: Arc<Wal>,
    writer: Arc<Writer>,
    sender: Option<Arc<Sender>>,
    replication_addr: Option<SocketAddr>,
    cancel: CancelToken,
    threads: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Engine {
    /// Open an instance rooted at `config.root_dir`
    ///
    /// On startup:
    /// 1. Validate the configuration
    /// 2. Replay and remove WAL files left by earlier instances
    /// 3. Start a fresh WAL segment
    /// 4. Spawn the sync and replication threads
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let instance_id = match config.instance_id {
            0 => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(1),
            id => id,
        };

        fs::create_dir_all(&config.root_dir).map_err(|e| {
            StoreError::Config(format!("cannot create {}: {}", config.root_dir.display(), e))
        })?;
        let store = Arc::new(PrimaryStore::new(&config.root_dir));

        let cleanup = cleanup_old_wal_files(&config.root_dir, None, instance_id, &store)?;
        if !cleanup.quarantined.is_empty() {
            tracing::warn!(files = ?cleanup.quarantined, "unreadable WAL files moved aside");
        }

        let sender = match (config.role, config.replication.enabled) {
            (Role::Primary, true) => Some(Arc::new(Sender::new(&config.replication))),
            _ => None,
        };
        let replication_sender: Arc<dyn ReplicationSender> = match &sender {
            Some(sender) => Arc::clone(sender) as Arc<dyn ReplicationSender>,
            None => Arc::new(NopReplicationSender),
        };

        let wal = Wal::open(&config.root_dir, instance_id, &config.wal, Arc::clone(&store), replication_sender)?;
        let writer = Arc::new(Writer::new(Arc::clone(&wal)));

        let mut engine = Self {
            config,
            instance_id,
            store,
            wal,
            writer,
            sender,
            replication_addr: None,
            cancel: CancelToken::new(),
            threads: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };
        if let Err(e) = engine.start_threads() {
            let _ = engine.shutdown();
            return Err(e);
        }

        tracing::info!(
            instance_id,
            role = ?engine.config.role,
            root = %engine.config.root_dir.display(),
            "engine opened"
        );
        Ok(engine)
    }

    fn start_threads(&mut self) -> Result<()> {
        if self.config.wal.background_sync {
            let handle = self.wal.spawn_sync_thread(self.cancel.clone())?;
            self.threads.lock().push(handle);
        }

        if let Some(sender) = &self.sender {
            let server = ReplicationServer::bind(&self.config.replication, Arc::clone(sender))?;
            self.replication_addr = Some(server.local_addr()?);
            let handle = server.spawn(self.cancel.clone())?;
            self.threads.lock().push(handle);
        }

        if self.config.role == Role::Replica {
            let primary = self
                .config
                .replication
                .primary_addr
                .clone()
                .ok_or_else(|| StoreError::Config("replica needs a primary address".to_string()))?;
            let client = TcpStreamClient::new(primary.clone(), &self.config.replication);
            let replayer = Replayer::new(Arc::clone(&self.writer) as Arc<dyn CsmWriter>);
            let mut receiver = Receiver::new(client, replayer);
            let retryer = Retryer::new(Backoff::from_config(&self.config.replication));
            let cancel = self.cancel.clone();

            let handle = thread::Builder::new()
                .name("replication-receiver".to_string())
                .spawn(move || {
                    let result = retryer.run(&cancel, |c| receiver.run(c));
                    match result {
                        Ok(()) | Err(StoreError::Cancelled) => {
                            tracing::info!(%primary, last_applied = receiver.last_applied(), "replication stopped");
                        }
                        Err(e) => {
                            tracing::error!(%primary, error = %e, "replication failed permanently");
                        }
                    }
                })?;
            self.threads.lock().push(handle);
        }
        Ok(())
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Write a batch of column series; returns once committed.
    ///
    /// Replicas only accept data from their primary.
    pub fn write_csm(&self, csm: &ColumnSeriesMap, is_variable: bool) -> Result<()> {
        if self.config.role == Role::Replica {
            return Err(StoreError::ReplicaReadOnly);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::WalWrite("engine is shut down".to_string()));
        }
        self.writer.write_csm(csm, is_variable)
    }

    /// Read intervals `first..=last` of one bucket year
    pub fn read(&self, key: &TimeBucketKey, year: i32, first: i64, last: i64) -> Result<ColumnSeries> {
        self.store.read_range(key, year, first, last)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn instance_id(&self) -> i64 {
        self.instance_id
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn store(&self) -> &Arc<PrimaryStore> {
        &self.store
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    /// Bound address of the replication server (primary only)
    pub fn replication_addr(&self) -> Option<SocketAddr> {
        self.replication_addr
    }

    /// Connected replicas (primary only)
    pub fn replica_count(&self) -> usize {
        self.sender.as_ref().map_or(0, |s| s.replica_count())
    }

    /// Stop all threads, commit what is queued and close the WAL
    pub fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(instance_id = self.instance_id, "shutting down");
        self.cancel.cancel();

        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                tracing::error!("background thread panicked");
            }
        }
        self.wal.close()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "shutdown on drop failed");
        }
    }
}
