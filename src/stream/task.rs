//! # Cooperative Task Loop
//!
//! Runs the RC stream as a single tokio task.
//!
//! The task opens one streaming session on the [`AsyncCommunicator`] and
//! feeds it a lazy update stream that snapshots the live channels once per
//! tick. Stop is signalled through a `watch` channel:
//! - the update stream yields one final neutral update and ends
//! - the ack loop stops waiting on the transport and gives the final
//!   update one tick to drain
//!
//! An aborted task (`JoinError::is_cancelled`) counts as a clean exit.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info};

use super::session::LoopHandle;
use super::{AckTracker, StreamSettings, StreamStats};
use crate::communicator::{AsyncCommunicator, RcUpdateStream};
use crate::error::{GeodriveError, Result};
use crate::protocol::{RcChannels, RcChannelsHandle};

/// Handle to a running stream task.
#[derive(Debug)]
pub struct TaskLoop {
    task: JoinHandle<Result<StreamStats>>,
    stop: watch::Sender<bool>,
}

impl TaskLoop {
    /// Spawns the RC stream task on the current tokio runtime.
    ///
    /// Returns once the task is scheduled; it does not wait for the first update.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn<C>(
        communicator: Arc<C>,
        channels: RcChannelsHandle,
        settings: StreamSettings,
    ) -> Self
    where
        C: AsyncCommunicator + ?Sized + 'static,
    {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let result = run_async_stream(communicator, channels, settings, stop_rx).await;
            if let Ok(stats) = &result {
                info!(
                    "RC stream task exited ({} updates acknowledged, {} rejected)",
                    stats.acknowledged, stats.rejected
                );
            }
            result
        });
        Self { task, stop }
    }

    /// Waits for the task to finish and returns what the loop returned.
    ///
    /// # Errors
    ///
    /// The loop's own fault, or [`GeodriveError::StreamTask`] if it panicked.
    pub async fn join(self) -> Result<StreamStats> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                debug!("RC stream task was cancelled");
                Ok(StreamStats::default())
            }
            Err(e) => Err(GeodriveError::StreamTask(e.to_string())),
        }
    }

    /// Cancels the task outright without waiting.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl LoopHandle for TaskLoop {
    fn signal_stop(&self) {
        // send_replace succeeds even with no receivers left
        self.stop.send_replace(true);
    }

    fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Resolves once stop is requested or the stop sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Lazy update stream: one snapshot per tick, then one neutral update after stop.
pub fn rc_updates(
    channels: RcChannelsHandle,
    period: Duration,
    stop: watch::Receiver<bool>,
) -> RcUpdateStream {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    futures::stream::unfold(
        (channels, ticker, stop, false),
        |(channels, mut ticker, mut stop, done)| async move {
            if done {
                return None;
            }
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => Some((RcChannels::neutral(), (channels, ticker, stop, true))),
                _ = ticker.tick() => {
                    let update = channels.snapshot();
                    Some((update, (channels, ticker, stop, false)))
                }
            }
        },
    )
    .boxed()
}

/// Body of the stream task.
///
/// Ends when the transport closes the ack stream, on a transport fault, when
/// the rejection limit is hit, or on stop.
pub async fn run_async_stream<C>(
    communicator: Arc<C>,
    channels: RcChannelsHandle,
    settings: StreamSettings,
    mut stop: watch::Receiver<bool>,
) -> Result<StreamStats>
where
    C: AsyncCommunicator + ?Sized,
{
    let updates = rc_updates(channels, settings.interval, stop.clone());
    let mut acks = communicator.stream_rc_channels(updates).await?;
    let mut tracker = AckTracker::new(settings.max_consecutive_rejections);

    loop {
        tokio::select! {
            ack = acks.next() => match ack {
                Some(ack) => tracker.observe(&ack?)?,
                None => break,
            },
            _ = stopped(&mut stop) => {
                let drain = async {
                    while let Some(Ok(_)) = acks.next().await {}
                };
                if timeout(settings.interval, drain).await.is_err() {
                    debug!("RC ack stream did not drain before stop");
                }
                break;
            }
        }
    }

    Ok(tracker.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::mocks::RecordingRover;
    use crate::protocol::Channel;

    fn fast_settings() -> StreamSettings {
        StreamSettings::default().with_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_updates_follow_live_channels() {
        let channels = RcChannelsHandle::new();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let mut updates = rc_updates(channels.clone(), Duration::from_millis(5), stop_rx);

        assert!(updates.next().await.unwrap().is_neutral());
        channels.set(Channel::Pitch, 1300).unwrap();
        assert_eq!(updates.next().await.unwrap().get(Channel::Pitch), 1300);
    }

    #[tokio::test]
    async fn test_updates_end_with_neutral_after_stop() {
        let channels = RcChannelsHandle::new();
        channels.set(Channel::Roll, 1900).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut updates = rc_updates(channels, Duration::from_millis(5), stop_rx);

        assert_eq!(updates.next().await.unwrap().get(Channel::Roll), 1900);
        stop_tx.send_replace(true);
        assert_eq!(updates.next().await, Some(RcChannels::neutral()));
        assert_eq!(updates.next().await, None);
    }

    #[tokio::test]
    async fn test_transport_fault_is_returned() {
        let rover = Arc::new(RecordingRover::new());
        rover.set_fail_rc_after(2);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let result =
            run_async_stream(rover.clone(), RcChannelsHandle::new(), fast_settings(), stop_rx).await;
        assert!(matches!(result, Err(GeodriveError::Transport(_))));
        assert_eq!(rover.frame_count(), 2);
    }

    #[tokio::test]
    async fn test_rejections_tolerated_without_limit() {
        let rover = Arc::new(RecordingRover::new());
        rover.set_reject_rc(true);

        let task = TaskLoop::spawn(rover.clone(), RcChannelsHandle::new(), fast_settings());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        task.signal_stop();
        let stats = task.join().await.unwrap();
        assert!(stats.rejected >= 2);
        assert_eq!(stats.rejected, stats.acknowledged);
    }

    #[tokio::test]
    async fn test_zero_interval_streams_without_panic() {
        let rover = Arc::new(RecordingRover::new());
        let settings = StreamSettings::default().with_interval(Duration::ZERO);

        let task = TaskLoop::spawn(rover.clone(), RcChannelsHandle::new(), settings);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        task.signal_stop();
        assert!(task.join().await.is_ok());
        assert!(rover.frame_count() >= 2);
    }

    #[tokio::test]
    async fn test_aborted_task_is_clean_exit() {
        let rover = Arc::new(RecordingRover::new());
        rover.set_rc_delay(Duration::from_secs(10));

        let task = TaskLoop::spawn(rover, RcChannelsHandle::new(), fast_settings());
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.abort();
        assert_eq!(task.join().await.unwrap(), StreamStats::default());
    }

    #[tokio::test]
    async fn test_stop_interrupts_pending_ack() {
        let rover = Arc::new(RecordingRover::new());
        rover.set_rc_delay(Duration::from_secs(10));

        let task = TaskLoop::spawn(rover, RcChannelsHandle::new(), fast_settings());
        tokio::time::sleep(Duration::from_millis(20)).await;

        task.signal_stop();
        let joined = timeout(Duration::from_secs(2), task.join()).await;
        assert!(joined.expect("stop should not wait on the transport").is_ok());
    }
}
