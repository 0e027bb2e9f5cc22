//! Commit pipeline
//!
//! Writers queue `WTSet`s into the transaction pipe. A flush drains the
//! pipe into one transaction group and commits it:
//!
//! ```text
//!   queue(WTSet) ──► [ write channel ] ──► flush_to_wal()
//!                                             │
//!                     ┌───────────────────────┼───────────────────────┐
//!                     ▼                       ▼                       ▼
//!              WAL append + fsync     replication sender        primary files
//! ```
//!
//! The sync thread flushes on a timer, on request and when the pipe is
//! close to full; it checkpoints on a slower timer and rotates the WAL
//! segment every few checkpoints.
//!
//! A TG that reached the WAL but not every primary file must stay
//! replayable: once a primary write fails no checkpoint is taken on the
//! segment, and it is closed unreplayed and kept for the next startup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use crossbeam::channel::{self, select, tick, RecvTimeoutError, TrySendError};
use parking_lot::Mutex;

use super::file::WalFile;
use super::message::ReplayState;
use super::tg::{TransactionGroup, WTSet};
use crate::config::WalConfig;
use crate::error::{Result, StoreError};
use crate::replication::ReplicationSender;
use crate::shutdown::CancelToken;
use crate::storage::PrimaryStore;

type FlushReply = channel::Sender<std::result::Result<i64, String>>;

/// Pending writes plus the TGID counter
struct TransactionPipe {
    write_tx: channel::Sender<WTSet>,
    write_rx: channel::Receiver<WTSet>,
    flush_tx: channel::Sender<FlushReply>,
    flush_rx: channel::Receiver<FlushReply>,
    capacity: usize,

    /// Seeded from the wall clock so TGIDs keep increasing across restarts
    tgid: AtomicI64,
}

impl TransactionPipe {
    fn new(capacity: usize) -> Self {
        let (write_tx, write_rx) = channel::bounded(capacity);
        let (flush_tx, flush_rx) = channel::unbounded();
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        Self {
            write_tx,
            write_rx,
            flush_tx,
            flush_rx,
            capacity,
            tgid: AtomicI64::new(seed),
        }
    }

    fn next_tgid(&self) -> i64 {
        self.tgid.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 80% full
    fn nearly_full(&self) -> bool {
        self.write_rx.len() * 5 >= self.capacity * 4
    }
}

pub struct Wal {
    root: PathBuf,
    instance_id: i64,
    config: WalConfig,
    store: Arc<PrimaryStore>,
    sender: Arc<dyn ReplicationSender>,

    /// Current segment; None under WAL bypass. The lock also serializes
    /// flushes, checkpoints and rotation.
    file: Mutex<Option<WalFile>>,

    pipe: TransactionPipe,
    writer_running: AtomicBool,

    /// A primary write failed after its TG was logged in the current segment
    primary_behind: AtomicBool,
}

impl Wal {
    /// Start a fresh WAL segment for this instance
    pub fn open(
        root: &Path,
        instance_id: i64,
        config: &WalConfig,
        store: Arc<PrimaryStore>,
        sender: Arc<dyn ReplicationSender>,
    ) -> Result<Arc<Self>> {
        let file = if config.bypass {
            tracing::warn!("WAL bypass enabled, writes are not logged or replicated");
            None
        } else {
            Some(WalFile::create(root, instance_id)?)
        };

        Ok(Arc::new(Self {
            root: root.to_path_buf(),
            instance_id,
            config: config.clone(),
            store,
            sender,
            file: Mutex::new(file),
            pipe: TransactionPipe::new(config.write_queue_capacity.max(1)),
            writer_running: AtomicBool::new(false),
            primary_behind: AtomicBool::new(false),
        }))
    }

    pub fn instance_id(&self) -> i64 {
        self.instance_id
    }

    /// Path of the live segment
    pub fn current_path(&self) -> Option<PathBuf> {
        self.file.lock().as_ref().map(|f| f.path().to_path_buf())
    }

    /// Most recently issued TGID
    pub fn last_tgid(&self) -> i64 {
        self.pipe.tgid.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.pipe.write_rx.len()
    }

    pub fn store(&self) -> &Arc<PrimaryStore> {
        &self.store
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Add a write command to the pipe, committing inline if it is full
    pub fn queue(&self, set: WTSet) -> Result<()> {
        let mut set = set;
        loop {
            match self.pipe.write_tx.try_send(set) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    set = back;
                    self.flush_to_wal()?;
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(StoreError::WalWrite("write pipe closed".to_string()))
                }
            }
        }
    }

    /// Commit everything queued as one transaction group.
    ///
    /// Returns the TGID used. An empty pipe only advances the counter.
    pub fn flush_to_wal(&self) -> Result<i64> {
        let mut file = self.file.lock();
        let sets: Vec<WTSet> = self.pipe.write_rx.try_iter().collect();
        let tgid = self.pipe.next_tgid();
        if sets.is_empty() {
            return Ok(tgid);
        }

        let tg = TransactionGroup::new(tgid, sets);
        if let Some(wal) = file.as_mut() {
            let bytes = tg.serialize()?;
            if let Err(e) = wal.append(self.instance_id, &bytes) {
                tracing::error!(tgid, error = %e, dropped = tg.sets.len(), "WAL commit failed");
                return Err(e);
            }
            self.sender.send(Bytes::from(bytes));
        }
        if let Err(e) = self.store.write_sets(&tg.sets) {
            if file.is_some() {
                self.primary_behind.store(true, Ordering::SeqCst);
            }
            tracing::error!(tgid, error = %e, "primary write failed, WAL segment kept for replay");
            return Err(e);
        }

        tracing::trace!(tgid, sets = tg.sets.len(), "committed transaction group");
        Ok(tgid)
    }

    /// Make queued writes durable before returning.
    ///
    /// With the sync thread running the request is handed to it and
    /// concurrent requests are answered by one flush; otherwise the flush
    /// runs on the caller's thread.
    pub fn request_flush(&self) -> Result<i64> {
        if !self.writer_running.load(Ordering::SeqCst) {
            return self.flush_to_wal();
        }

        let (reply_tx, reply_rx) = channel::bounded(1);
        if self.pipe.flush_tx.send(reply_tx).is_err() {
            return self.flush_to_wal();
        }
        loop {
            match reply_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(result) => return result.map_err(StoreError::WalWrite),
                Err(RecvTimeoutError::Timeout) => {
                    if !self.writer_running.load(Ordering::SeqCst) {
                        return self.flush_to_wal();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return self.flush_to_wal(),
            }
        }
    }

    // =========================================================================
    // Checkpoints and rotation
    // =========================================================================

    /// Whether a primary write failed since the current segment was opened
    pub fn primary_behind(&self) -> bool {
        self.primary_behind.load(Ordering::SeqCst)
    }

    /// fsync primary files and record a checkpoint in the WAL.
    ///
    /// No checkpoint is recorded while the primary files are behind the
    /// segment.
    pub fn checkpoint(&self) -> Result<bool> {
        let mut file = self.file.lock();
        match file.as_mut() {
            Some(_) if self.primary_behind() => {
                self.store.sync_dirty()?;
                tracing::warn!("primary files behind the WAL, skipping checkpoint");
                Ok(false)
            }
            Some(wal) => wal.checkpoint(&self.store),
            None => {
                self.store.sync_dirty()?;
                Ok(false)
            }
        }
    }

    /// Switch to a new segment.
    ///
    /// The old segment is checkpointed and deleted; if the primary files
    /// are behind it, it is closed unreplayed and left for startup replay.
    pub fn rotate(&self) -> Result<()> {
        let mut file = self.file.lock();
        let current = match file.as_mut() {
            Some(current) => current,
            None => return Ok(()),
        };
        let behind = self.primary_behind();
        if behind {
            self.store.sync_dirty()?;
        } else {
            current.checkpoint(&self.store)?;
        }

        let fresh = WalFile::create(&self.root, self.instance_id)?;
        let mut old = std::mem::replace(current, fresh);
        if behind {
            old.close(ReplayState::NotReplayed)?;
            self.primary_behind.store(false, Ordering::SeqCst);
            tracing::warn!(path = %old.path().display(), "kept WAL segment for replay at next startup");
        } else {
            old.close(ReplayState::Replayed)?;
            old.delete(self.instance_id)?;
        }
        Ok(())
    }

    /// Final checkpoint and close of the live segment
    pub fn close(&self) -> Result<()> {
        self.flush_to_wal()?;
        let mut file = self.file.lock();
        if let Some(mut wal) = file.take() {
            if self.primary_behind() {
                self.store.sync_dirty()?;
                wal.close(ReplayState::NotReplayed)?;
                tracing::warn!(path = %wal.path().display(), "WAL closed with writes left to replay");
            } else {
                wal.checkpoint(&self.store)?;
                wal.close(ReplayState::Replayed)?;
                tracing::info!(path = %wal.path().display(), "WAL closed");
            }
        } else {
            self.store.sync_dirty()?;
        }
        Ok(())
    }

    // =========================================================================
    // Sync thread
    // =========================================================================

    /// Spawn the background sync thread
    pub fn spawn_sync_thread(self: &Arc<Self>, cancel: CancelToken) -> Result<JoinHandle<()>> {
        self.writer_running.store(true, Ordering::SeqCst);
        let wal = Arc::clone(self);
        thread::Builder::new()
            .name("wal-sync".to_string())
            .spawn(move || wal.sync_loop(&cancel))
            .map_err(|e| {
                self.writer_running.store(false, Ordering::SeqCst);
                StoreError::Io(e)
            })
    }

    /// Timer-driven flush, checkpoint and rotate loop; returns once
    /// `cancel` fires, after a final flush and checkpoint.
    pub fn sync_loop(&self, cancel: &CancelToken) {
        self.writer_running.store(true, Ordering::SeqCst);
        let sync_interval = self.config.sync_interval.max(Duration::from_millis(1));
        let wal_tick = tick(sync_interval);
        let check_tick = tick((sync_interval / 100).max(Duration::from_millis(1)));
        let primary_tick = tick(self.config.primary_refresh_interval.max(Duration::from_millis(1)));
        let mut checkpoints = 0u32;

        tracing::debug!(?sync_interval, "WAL sync thread started");
        loop {
            select! {
                recv(cancel.receiver()) -> _ => break,
                recv(self.pipe.flush_rx) -> request => {
                    if let Ok(reply) = request {
                        self.answer_flush_requests(reply);
                    }
                }
                recv(wal_tick) -> _ => self.flush_logged(),
                recv(check_tick) -> _ => {
                    if self.pipe.nearly_full() {
                        self.flush_logged();
                    }
                }
                recv(primary_tick) -> _ => {
                    self.flush_logged();
                    match self.checkpoint() {
                        Ok(true) => checkpoints += 1,
                        Ok(false) => {}
                        Err(e) => tracing::error!(error = %e, "WAL checkpoint failed"),
                    }
                    let every = self.config.rotate_every_checkpoints;
                    if self.primary_behind() || (every > 0 && checkpoints >= every) {
                        checkpoints = 0;
                        if let Err(e) = self.rotate() {
                            tracing::error!(error = %e, "WAL rotation failed");
                        }
                    }
                }
            }
        }

        self.writer_running.store(false, Ordering::SeqCst);
        self.flush_logged();
        while let Ok(reply) = self.pipe.flush_rx.try_recv() {
            self.answer_flush_requests(reply);
        }
        if let Err(e) = self.checkpoint() {
            tracing::error!(error = %e, "final WAL checkpoint failed");
        }
        tracing::debug!("WAL sync thread stopped");
    }

    fn answer_flush_requests(&self, first: FlushReply) {
        let mut replies = vec![first];
        replies.extend(self.pipe.flush_rx.try_iter());
        let result = self.flush_to_wal().map_err(|e| e.to_string());
        for reply in replies {
            let _ = reply.send(result.clone());
        }
    }

    fn flush_logged(&self) {
        if let Err(e) = self.flush_to_wal() {
            tracing::error!(error = %e, "WAL flush failed");
        }
    }
}
