//! Retry with exponential backoff
//!
//! `Retryer::run` keeps calling an operation while it fails with a
//! retryable error, sleeping `interval * coeff^n` before attempt `n + 1`.
//! Sleeps wake early on cancellation.

use std::time::Duration;

use crate::config::ReplicationConfig;
use crate::error::{Result, StoreError};
use crate::shutdown::CancelToken;

/// Upper bound on a single backoff sleep
pub const MAX_DELAY: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    pub interval: Duration,
    pub coeff: u32,

    /// Total attempts allowed (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Backoff {
    pub fn new(interval: Duration, coeff: u32, max_attempts: Option<u32>) -> Self {
        Self {
            interval,
            coeff,
            max_attempts,
        }
    }

    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self::new(config.retry_interval, config.retry_backoff_coeff, config.max_attempts)
    }

    /// Sleep after failed attempt `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.coeff
            .checked_pow(attempt)
            .and_then(|factor| self.interval.checked_mul(factor))
            .map_or(MAX_DELAY, |d| d.min(MAX_DELAY))
    }
}

pub struct Retryer {
    backoff: Backoff,
}

impl Retryer {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Run `op` until it succeeds, fails fatally, runs out of attempts or
    /// `cancel` fires. The attempt counter lives for this call only.
    pub fn run<F>(&self, cancel: &CancelToken, mut op: F) -> Result<()>
    where
        F: FnMut(&CancelToken) -> Result<()>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }

            let err = match op(cancel) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if matches!(err, StoreError::Cancelled) || !err.is_retryable() {
                return Err(err);
            }
            if let Some(max) = self.backoff.max_attempts {
                if attempt + 1 >= max {
                    tracing::error!(attempts = attempt + 1, error = %err, "giving up after retries");
                    return Err(err);
                }
            }

            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            tracing::warn!(attempt, ?delay, error = %err, "operation failed, retrying");
            if !cancel.sleep(delay) {
                return Err(StoreError::Cancelled);
            }
        }
    }
}
