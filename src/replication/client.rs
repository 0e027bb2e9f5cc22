//! Replica-side stream client

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, select};

use super::protocol::{read_frame, write_frame, Frame};
use crate::config::ReplicationConfig;
use crate::error::{Result, StoreError};
use crate::shutdown::CancelToken;

/// How often a blocked receive checks for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Source of transaction groups from a primary
pub trait StreamClient: Send {
    /// Open the stream, asking for everything after `resume_after`
    fn connect(&mut self, cancel: &CancelToken, resume_after: Option<i64>) -> Result<()>;

    /// Next transaction group; heartbeats are consumed internally
    fn recv(&mut self, cancel: &CancelToken) -> Result<Bytes>;
}

pub struct TcpStreamClient {
    addr: String,
    connect_timeout: Duration,
    idle_timeout: Duration,
    reader: Option<BufReader<TcpStream>>,
}

impl TcpStreamClient {
    pub fn new(addr: impl Into<String>, config: &ReplicationConfig) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: config.connect_timeout,
            idle_timeout: config.idle_timeout,
            reader: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    /// Resolve and connect on a helper thread so cancellation does not wait
    /// out the connect timeout. An abandoned attempt finishes on its own
    /// and drops whatever it connected.
    fn open(&self, cancel: &CancelToken) -> Result<TcpStream> {
        let (tx, rx) = channel::bounded(1);
        let addr = self.addr.clone();
        let timeout = self.connect_timeout;
        thread::Builder::new()
            .name("replication-connect".to_string())
            .spawn(move || {
                let _ = tx.send(connect_any(&addr, timeout));
            })?;

        select! {
            recv(cancel.receiver()) -> _ => {
                tracing::debug!(primary = %self.addr, "connect abandoned");
                Err(StoreError::Cancelled)
            }
            recv(rx) -> result => match result {
                Ok(connected) => connected,
                Err(_) => Err(StoreError::transport(format!("connect to {} gave no result", self.addr))),
            },
        }
    }

    /// Wait until a frame starts arriving, watching for cancellation and
    /// an idle primary
    fn wait_readable(&mut self, cancel: &CancelToken, since: Instant) -> Result<()> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| StoreError::transport("not connected"))?;
        if !reader.buffer().is_empty() {
            return Ok(());
        }

        let mut first_byte = [0u8; 1];
        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            match reader.get_ref().peek(&mut first_byte) {
                Ok(0) => return Err(StoreError::transport(format!("{} closed the stream", self.addr))),
                Ok(_) => return Ok(()),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if since.elapsed() >= self.idle_timeout {
                        return Err(StoreError::transport(format!(
                            "no traffic from {} for {:?}",
                            self.addr, self.idle_timeout
                        )));
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(StoreError::transport(e)),
            }
        }
    }
}

fn connect_any(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let addrs = addr.to_socket_addrs().map_err(StoreError::transport)?;
    let mut last_err = None;
    for sock in addrs {
        match TcpStream::connect_timeout(&sock, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(match last_err {
        Some(e) => StoreError::transport(format!("connect to {}: {}", addr, e)),
        None => StoreError::transport(format!("{} resolved to no addresses", addr)),
    })
}

impl StreamClient for TcpStreamClient {
    fn connect(&mut self, cancel: &CancelToken, resume_after: Option<i64>) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        self.reader = None;

        let stream = self.open(cancel)?;
        stream.set_nodelay(true).map_err(StoreError::transport)?;
        stream
            .set_write_timeout(Some(self.connect_timeout))
            .map_err(StoreError::transport)?;
        let mut writer = BufWriter::new(stream.try_clone().map_err(StoreError::transport)?);
        write_frame(&mut writer, &Frame::Subscribe { resume_after }).map_err(StoreError::transport)?;

        stream
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(StoreError::transport)?;
        self.reader = Some(BufReader::new(stream));
        tracing::info!(primary = %self.addr, ?resume_after, "subscribed to primary");
        Ok(())
    }

    fn recv(&mut self, cancel: &CancelToken) -> Result<Bytes> {
        let mut since = Instant::now();
        loop {
            if let Err(e) = self.wait_readable(cancel, since) {
                if !matches!(e, StoreError::Cancelled) {
                    self.reader = None;
                }
                return Err(e);
            }

            let reader = self
                .reader
                .as_mut()
                .ok_or_else(|| StoreError::transport("not connected"))?;
            // A frame has started: give the rest of it the full idle timeout
            reader
                .get_ref()
                .set_read_timeout(Some(self.idle_timeout))
                .map_err(StoreError::transport)?;
            let frame = read_frame(reader);
            if let Some(reader) = self.reader.as_ref() {
                let _ = reader.get_ref().set_read_timeout(Some(POLL_INTERVAL));
            }

            match frame {
                Ok(Frame::TransactionGroup(tg)) => return Ok(tg),
                Ok(Frame::Heartbeat) => {
                    tracing::trace!(primary = %self.addr, "heartbeat");
                    since = Instant::now();
                }
                Ok(Frame::Subscribe { .. }) => {
                    self.reader = None;
                    return Err(StoreError::Protocol("unexpected SUBSCRIBE from primary".to_string()));
                }
                Err(StoreError::Io(e)) => {
                    self.reader = None;
                    return Err(StoreError::transport(e));
                }
                Err(e) => {
                    self.reader = None;
                    return Err(e);
                }
            }
        }
    }
}
