//! Replication sender
//!
//! Fans committed transaction groups out to one bounded queue per
//! connected replica. A queue that stays full past the enqueue timeout is
//! evicted; its stream thread sees the disconnect, drops the connection
//! and the replica reconnects, resuming from the backlog.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, SendTimeoutError};
use parking_lot::Mutex;

use crate::config::ReplicationConfig;
use crate::wal::peek_tgid;

/// Destination for committed transaction groups
pub trait ReplicationSender: Send + Sync {
    fn send(&self, tg: Bytes);
}

/// Sender used when replication is off
#[derive(Debug, Default, Clone, Copy)]
pub struct NopReplicationSender;

impl ReplicationSender for NopReplicationSender {
    fn send(&self, _tg: Bytes) {}
}

/// What a newly registered replica receives
pub struct Subscription {
    pub queue: channel::Receiver<Bytes>,

    /// Backlog entries after the requested TGID, oldest first
    pub backlog: Vec<Bytes>,

    /// The requested TGID is older than anything kept
    pub gap: bool,
}

#[derive(Default)]
struct Backlog {
    entries: VecDeque<(i64, Bytes)>,

    /// Highest TGID pushed out of the backlog (0 = none)
    dropped_through: i64,
}

pub struct Sender {
    replicas: Mutex<HashMap<String, channel::Sender<Bytes>>>,
    backlog: Mutex<Backlog>,
    backlog_capacity: usize,
    queue_size: usize,
    enqueue_timeout: Duration,
}

impl Sender {
    pub fn new(config: &ReplicationConfig) -> Self {
        Self {
            replicas: Mutex::new(HashMap::new()),
            backlog: Mutex::new(Backlog::default()),
            backlog_capacity: config.backlog_capacity,
            queue_size: config.queue_size.max(1),
            enqueue_timeout: config.enqueue_timeout,
        }
    }

    /// Add a replica queue. With `resume_after` set, the backlog after that
    /// TGID is handed back for the caller to stream first.
    pub fn register(&self, addr: &str, resume_after: Option<i64>) -> Subscription {
        // Backlog lock first, same order as send(), so no TG falls between
        // the backlog copy and the live queue
        let backlog = self.backlog.lock();
        let (tx, rx) = channel::bounded(self.queue_size);

        let (entries, gap) = match resume_after {
            None => (Vec::new(), false),
            Some(after) => {
                let gap = after < backlog.dropped_through;
                let entries = backlog
                    .entries
                    .iter()
                    .filter(|(tgid, _)| *tgid > after)
                    .map(|(_, tg)| tg.clone())
                    .collect();
                (entries, gap)
            }
        };

        if self.replicas.lock().insert(addr.to_string(), tx).is_some() {
            tracing::warn!(replica = %addr, "replaced existing replica registration");
        }
        tracing::info!(replica = %addr, ?resume_after, backlog = entries.len(), gap, "replica registered");

        Subscription {
            queue: rx,
            backlog: entries,
            gap,
        }
    }

    pub fn unregister(&self, addr: &str) {
        if self.replicas.lock().remove(addr).is_some() {
            tracing::info!(replica = %addr, "replica unregistered");
        }
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.lock().len()
    }

    fn evict(&self, addr: &str, queue: &channel::Sender<Bytes>) {
        let mut replicas = self.replicas.lock();
        if replicas.get(addr).map_or(false, |current| current.same_channel(queue)) {
            replicas.remove(addr);
        }
    }
}

impl ReplicationSender for Sender {
    fn send(&self, tg: Bytes) {
        let tgid = match peek_tgid(&tg) {
            Ok(tgid) => tgid,
            Err(e) => {
                tracing::error!(error = %e, "refusing to replicate malformed transaction group");
                return;
            }
        };

        let targets: Vec<(String, channel::Sender<Bytes>)> = {
            let mut backlog = self.backlog.lock();
            if self.backlog_capacity > 0 {
                if backlog.entries.len() == self.backlog_capacity {
                    if let Some((dropped, _)) = backlog.entries.pop_front() {
                        backlog.dropped_through = dropped;
                    }
                }
                backlog.entries.push_back((tgid, tg.clone()));
            }
            let replicas = self.replicas.lock();
            replicas.iter().map(|(a, q)| (a.clone(), q.clone())).collect()
        };

        for (addr, queue) in targets {
            match queue.send_timeout(tg.clone(), self.enqueue_timeout) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!(replica = %addr, tgid, "replica queue full, evicting");
                    self.evict(&addr, &queue);
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    tracing::debug!(replica = %addr, "replica stream gone");
                    self.evict(&addr, &queue);
                }
            }
        }
    }
}
