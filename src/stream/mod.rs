//! # RC Streaming Module
//!
//! The continuously running RC transmission loop and its lifecycle.
//!
//! This module handles:
//! - The session state machine shared by both managers ([`session`])
//! - The thread-based loop: stop flag, bounded join ([`worker`])
//! - The tokio task loop: watch-based stop, update stream ([`task`])
//! - Loop timing and acknowledgement bookkeeping
//!
//! ## Negative acknowledgements
//!
//! Both loops treat a rejected update the same way: it is logged and counted,
//! and the loop keeps going. With `max_consecutive_rejections > 0` the loop
//! gives up with [`GeodriveError::StreamRejected`] once that many rejections
//! arrive back to back.

pub mod session;
pub mod task;
pub mod worker;

use std::time::Duration;

use tracing::warn;

use crate::config::RcStreamConfig;
use crate::error::{GeodriveError, Result};
use crate::protocol::RcAck;

pub use session::SessionState;

/// Default RC stream rate (Hz)
pub const DEFAULT_RATE_HZ: u32 = 20;

/// Shortest accepted tick interval; anything below is raised to this
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Default bound on waiting for a worker thread to exit
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Loop timing and failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Time between consecutive updates
    pub interval: Duration,
    /// How long the thread-based manager waits for the loop to exit on stop
    pub stop_timeout: Duration,
    /// Consecutive rejected updates that end the loop (0 = never)
    pub max_consecutive_rejections: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from_rate_hz(DEFAULT_RATE_HZ)
    }
}

impl StreamSettings {
    /// Settings for a given update rate with default stop timeout.
    ///
    /// A rate of 0 is treated as 1 Hz; rates above 1 kHz tick at [`MIN_INTERVAL`].
    #[must_use]
    pub fn from_rate_hz(rate_hz: u32) -> Self {
        Self {
            interval: (Duration::from_secs(1) / rate_hz.max(1)).max(MIN_INTERVAL),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            max_consecutive_rejections: 0,
        }
    }

    /// Overrides the tick interval, raised to at least [`MIN_INTERVAL`].
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Overrides the stop timeout.
    #[must_use]
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Overrides the rejection limit.
    #[must_use]
    pub fn with_max_consecutive_rejections(mut self, limit: u32) -> Self {
        self.max_consecutive_rejections = limit;
        self
    }
}

impl From<&RcStreamConfig> for StreamSettings {
    fn from(config: &RcStreamConfig) -> Self {
        Self::from_rate_hz(config.rate_hz)
            .with_stop_timeout(Duration::from_millis(config.stop_timeout_ms))
            .with_max_consecutive_rejections(config.max_consecutive_rejections)
    }
}

/// Counters for one finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Updates acknowledged by the rover (accepted or rejected)
    pub acknowledged: u64,
    /// Updates the rover rejected
    pub rejected: u64,
}

/// Applies the negative-ack policy to each acknowledgement.
#[derive(Debug)]
pub(crate) struct AckTracker {
    limit: u32,
    consecutive: u32,
    stats: StreamStats,
}

impl AckTracker {
    pub(crate) fn new(limit: u32) -> Self {
        Self {
            limit,
            consecutive: 0,
            stats: StreamStats::default(),
        }
    }

    /// Records one ack. Errors once the rejection limit is hit.
    pub(crate) fn observe(&mut self, ack: &RcAck) -> Result<()> {
        self.stats.acknowledged += 1;
        if ack.success {
            self.consecutive = 0;
            return Ok(());
        }

        self.stats.rejected += 1;
        self.consecutive += 1;
        let reason = ack.message.as_deref().unwrap_or("no reason given");
        warn!("RC update rejected: {}", reason);

        if self.limit > 0 && self.consecutive >= self.limit {
            return Err(GeodriveError::StreamRejected(format!(
                "{} consecutive updates rejected, last: {}",
                self.consecutive, reason
            )));
        }
        Ok(())
    }

    pub(crate) fn stats(&self) -> StreamStats {
        self.stats
    }
}
