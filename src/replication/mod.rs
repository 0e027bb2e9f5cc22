//! Replication Module
//!
//! Streams committed transaction groups from a primary to its replicas.
//!
//! ```text
//!  PRIMARY                                   REPLICA
//!  flush_to_wal ──► Sender ──► queue ──┐
//!                    │ backlog         │ TCP
//!  ReplicationServer ◄──── SUBSCRIBE ──┼──── TcpStreamClient
//!        stream thread ── TG/HEARTBEAT ┘         │
//!                                            Receiver ──► Replayer ──► Writer
//!                                               ▲
//!                                            Retryer (backoff, cancellation)
//! ```

mod client;
mod protocol;
mod receiver;
mod replayer;
mod retry;
mod sender;
mod server;

pub use client::{StreamClient, TcpStreamClient};
pub use protocol::{read_frame, write_frame, Frame, FrameKind, MAX_PAYLOAD_SIZE};
pub use receiver::Receiver;
pub use replayer::Replayer;
pub use retry::{Backoff, Retryer, MAX_DELAY};
pub use sender::{NopReplicationSender, ReplicationSender, Sender, Subscription};
pub use server::ReplicationServer;
