//! Replica receive loop

use super::client::StreamClient;
use super::replayer::Replayer;
use crate::error::{Result, StoreError};
use crate::shutdown::CancelToken;

pub struct Receiver<C: StreamClient> {
    client: C,
    replayer: Replayer,
}

impl<C: StreamClient> Receiver<C> {
    pub fn new(client: C, replayer: Replayer) -> Self {
        Self { client, replayer }
    }

    pub fn last_applied(&self) -> i64 {
        self.replayer.last_applied()
    }

    /// Connect and apply transaction groups until the stream fails or
    /// `cancel` fires. Never returns `Ok`: every exit is an error the
    /// caller classifies.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<()> {
        let resume_after = match self.replayer.last_applied() {
            0 => None,
            tgid => Some(tgid),
        };
        self.client.connect(cancel, resume_after)?;

        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let tg = self.client.recv(cancel)?;
            if let Err(e) = self.replayer.replay(&tg) {
                return Err(match e {
                    e @ (StoreError::ReplayRejected { .. } | StoreError::Cancelled) => e,
                    other => StoreError::ReplayRejected {
                        tgid: crate::wal::peek_tgid(&tg).unwrap_or(-1),
                        reason: other.to_string(),
                    },
                });
            }
        }
    }
}
