//! Replication server
//!
//! Accepts replica connections on the primary and runs one stream thread
//! per replica:
//!
//! ```text
//! replica ── SUBSCRIBE(resume?) ──► primary
//!         ◄── TRANSACTION_GROUP ×backlog
//!         ◄── TRANSACTION_GROUP / HEARTBEAT ...  (until either side drops)
//! ```

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::select;

use super::protocol::{read_frame, write_frame, Frame};
use super::sender::Sender;
use crate::config::ReplicationConfig;
use crate::error::{Result, StoreError};
use crate::shutdown::CancelToken;

/// Accept-loop poll interval while no connection is pending
const ACCEPT_POLL: Duration = Duration::from_millis(50);

pub struct ReplicationServer {
    listener: TcpListener,
    sender: Arc<Sender>,
    config: ReplicationConfig,
}

impl ReplicationServer {
    pub fn bind(config: &ReplicationConfig, sender: Arc<Sender>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).map_err(|e| {
            StoreError::Config(format!("cannot listen on {}: {}", config.listen_addr, e))
        })?;
        listener.set_nonblocking(true)?;
        tracing::info!(addr = %listener.local_addr()?, "replication server listening");
        Ok(Self {
            listener,
            sender,
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn spawn(self, cancel: CancelToken) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("replication-accept".to_string())
            .spawn(move || self.run(&cancel))?;
        Ok(handle)
    }

    /// Accept replicas until cancelled, then wait for their streams to end
    pub fn run(&self, cancel: &CancelToken) {
        let mut streams: Vec<JoinHandle<()>> = Vec::new();

        while !cancel.is_cancelled() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let sender = Arc::clone(&self.sender);
                    let config = self.config.clone();
                    let cancel = cancel.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("replica-{}", peer))
                        .spawn(move || {
                            let mut replica = match ReplicaStream::new(stream, sender, config) {
                                Ok(replica) => replica,
                                Err(e) => {
                                    tracing::warn!(%peer, error = %e, "failed to set up replica stream");
                                    return;
                                }
                            };
                            if let Err(e) = replica.serve(&cancel) {
                                tracing::warn!(%peer, error = %e, "replica stream ended with error");
                            }
                        });
                    match spawned {
                        Ok(handle) => streams.push(handle),
                        Err(e) => tracing::error!(%peer, error = %e, "failed to spawn replica thread"),
                    }
                    streams.retain(|h| !h.is_finished());
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    cancel.sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    cancel.sleep(ACCEPT_POLL);
                }
            }
        }

        for handle in streams {
            let _ = handle.join();
        }
        tracing::info!("replication server stopped");
    }
}

/// One replica connection on the primary
struct ReplicaStream {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    sender: Arc<Sender>,
    config: ReplicationConfig,
    peer_addr: String,
}

impl ReplicaStream {
    fn new(stream: TcpStream, sender: Arc<Sender>, config: ReplicationConfig) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(config.idle_timeout))?;
        stream.set_write_timeout(Some(config.idle_timeout))?;

        let read_stream = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            sender,
            config,
            peer_addr,
        })
    }

    fn serve(&mut self, cancel: &CancelToken) -> Result<()> {
        let resume_after = match read_frame(&mut self.reader) {
            Ok(Frame::Subscribe { resume_after }) => resume_after,
            Ok(other) => {
                return Err(StoreError::Protocol(format!(
                    "expected SUBSCRIBE, got {:?}",
                    other.kind()
                )))
            }
            Err(StoreError::Io(ref e)) if is_disconnect(e.kind()) => {
                tracing::debug!(peer = %self.peer_addr, "replica left before subscribing");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let subscription = self.sender.register(&self.peer_addr, resume_after);
        if subscription.gap {
            tracing::warn!(
                peer = %self.peer_addr,
                ?resume_after,
                "replica is behind the backlog, some transaction groups cannot be resent"
            );
        }

        let result = self.stream(cancel, subscription);
        self.sender.unregister(&self.peer_addr);
        match result {
            Err(StoreError::Io(ref e)) if is_disconnect(e.kind()) => {
                tracing::debug!(peer = %self.peer_addr, "replica disconnected");
                Ok(())
            }
            other => other,
        }
    }

    fn stream(&mut self, cancel: &CancelToken, subscription: super::sender::Subscription) -> Result<()> {
        for tg in subscription.backlog {
            write_frame(&mut self.writer, &Frame::TransactionGroup(tg))?;
        }

        let queue = subscription.queue;
        loop {
            select! {
                recv(cancel.receiver()) -> _ => return Ok(()),
                recv(queue) -> tg => match tg {
                    Ok(tg) => write_frame(&mut self.writer, &Frame::TransactionGroup(tg))?,
                    Err(_) => {
                        tracing::warn!(peer = %self.peer_addr, "replica evicted, closing stream");
                        return Ok(());
                    }
                },
                default(self.config.heartbeat_interval) => {
                    write_frame(&mut self.writer, &Frame::Heartbeat)?;
                }
            }
        }
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}
