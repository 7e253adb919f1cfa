//! # Worker Thread Loop
//!
//! Runs the RC stream on a dedicated OS thread.
//!
//! The thread pushes one update per tick through [`Communicator::stream_rc_channels`]
//! and sleeps on a [`StopFlag`] for the rest of the tick, so a stop request
//! interrupts the wait immediately. An update already in flight is allowed
//! to complete before the loop sees the flag.
//!
//! Stopping uses a bounded join. A thread that does not exit in time is
//! abandoned: it still exits once its current I/O call returns, the caller
//! just stops waiting for it.

use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::session::LoopHandle;
use super::{AckTracker, StreamSettings, StreamStats};
use crate::communicator::Communicator;
use crate::error::Result;
use crate::protocol::{RcChannels, RcChannelsHandle};

/// Name given to RC stream worker threads
const WORKER_THREAD_NAME: &str = "geodrive-rc-stream";

/// Interruptible stop signal for worker threads.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag and wakes any waiter.
    pub fn set(&self) {
        let (lock, condvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps up to `timeout`, returning early once the flag is raised.
    ///
    /// Returns whether the flag is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, condvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Extension trait for timeout-capable thread joins
pub trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::result::Result<(), JoinFailure>;
}

/// Why a bounded join did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinFailure {
    /// The thread was still running when the timeout expired
    TimedOut,
    /// The thread panicked
    Panicked,
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::result::Result<(), JoinFailure> {
        let (tx, rx) = mpsc::channel();

        // Watchdog joins the target so we can wait on a channel with a timeout
        thread::spawn(move || {
            let result = self.join();
            // Receiver may already have timed out
            let _ = tx.send(result.is_ok());
        });

        match rx.recv_timeout(timeout) {
            Ok(true) => Ok(()),
            Ok(false) | Err(mpsc::RecvTimeoutError::Disconnected) => Err(JoinFailure::Panicked),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(JoinFailure::TimedOut),
        }
    }
}

/// Handle to a running worker thread.
#[derive(Debug)]
pub struct WorkerLoop {
    thread: JoinHandle<()>,
    stop: StopFlag,
}

impl WorkerLoop {
    /// Spawns the RC stream thread.
    ///
    /// Returns as soon as the thread is created; the first update goes out
    /// from the new thread.
    ///
    /// # Errors
    ///
    /// Returns [`GeodriveError::Io`](crate::error::GeodriveError::Io) if the OS refuses to create the thread.
    pub fn spawn<C>(
        communicator: Arc<C>,
        channels: RcChannelsHandle,
        settings: StreamSettings,
    ) -> Result<Self>
    where
        C: Communicator + ?Sized + 'static,
    {
        let stop = StopFlag::new();
        let loop_stop = stop.clone();

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                match run_blocking_stream(&*communicator, &channels, &settings, &loop_stop) {
                    Ok(stats) => info!(
                        "RC stream thread exited ({} updates acknowledged, {} rejected)",
                        stats.acknowledged, stats.rejected
                    ),
                    Err(e) => error!("RC stream error: {}", e),
                }
            })?;

        Ok(Self { thread, stop })
    }

    /// Waits up to `timeout` for the thread to exit.
    pub fn join(self, timeout: Duration) -> std::result::Result<(), JoinFailure> {
        self.thread.join_timeout(timeout)
    }
}

impl LoopHandle for WorkerLoop {
    fn signal_stop(&self) {
        self.stop.set();
    }

    fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Body of the worker thread.
///
/// Re-reads `channels` every tick. Ends on the stop flag, on a transport
/// fault, or when the rejection limit is hit. After a requested stop one
/// final neutral update is sent on a best-effort basis.
pub fn run_blocking_stream<C>(
    communicator: &C,
    channels: &RcChannelsHandle,
    settings: &StreamSettings,
    stop: &StopFlag,
) -> Result<StreamStats>
where
    C: Communicator + ?Sized,
{
    let mut tracker = AckTracker::new(settings.max_consecutive_rejections);

    while !stop.is_set() {
        let tick_start = Instant::now();
        let update = channels.snapshot();

        let ack = communicator.stream_rc_channels(&update)?;
        tracker.observe(&ack)?;
        debug!("RC update sent: {:?}", update.values());

        let remaining = settings.interval.saturating_sub(tick_start.elapsed());
        stop.wait_timeout(remaining);
    }

    if let Err(e) = communicator.stream_rc_channels(&RcChannels::neutral()) {
        debug!("Final neutral RC update not delivered: {}", e);
    }

    Ok(tracker.stats())
}
