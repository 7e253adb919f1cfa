//! # Cooperative Movement Manager
//!
//! Async motion commands plus an RC stream running as a tokio task.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use geodrive::communicator::{sim::SimulatedRover, AsyncCommunicator};
//! use geodrive::movement::AsyncMovementManager;
//! use geodrive::protocol::Channel;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let rover = Arc::new(SimulatedRover::new());
//!     rover.connect().await?;
//!
//!     let movement = AsyncMovementManager::new(rover);
//!     movement.start_rc_stream().await;
//!     movement.rc_channels().set(Channel::Throttle, 1600)?;
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     movement.stop_rc_stream().await?; // all channels back to 1500
//!
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::communicator::AsyncCommunicator;
use crate::error::Result;
use crate::protocol::{CommandResult, RcChannels, RcChannelsHandle, RoverCommand};
use crate::stream::session::{Session, SessionState, StartDecision};
use crate::stream::task::TaskLoop;
use crate::stream::StreamSettings;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cooperative (tokio task) movement manager.
pub struct AsyncMovementManager<C: AsyncCommunicator + ?Sized + 'static> {
    communicator: Arc<C>,
    rc_channels: RcChannelsHandle,
    settings: StreamSettings,
    session: Mutex<Session<TaskLoop>>,
    /// Serializes whole start/stop transitions, held across the stop await
    transition: tokio::sync::Mutex<()>,
}

impl<C: AsyncCommunicator + ?Sized + 'static> std::fmt::Debug for AsyncMovementManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncMovementManager")
            .field("rc_channels", &self.rc_channels.snapshot())
            .field("settings", &self.settings)
            .field("stream_state", &self.stream_state())
            .finish_non_exhaustive()
    }
}

impl<C: AsyncCommunicator + ?Sized + 'static> AsyncMovementManager<C> {
    /// Creates a manager with default stream settings (20 Hz).
    pub fn new(communicator: Arc<C>) -> Self {
        Self::with_settings(communicator, StreamSettings::default())
    }

    /// Creates a manager with explicit stream settings.
    ///
    /// `stop_timeout` is not used: stopping always waits for the task.
    pub fn with_settings(communicator: Arc<C>, settings: StreamSettings) -> Self {
        Self {
            communicator,
            rc_channels: RcChannelsHandle::new(),
            settings,
            session: Mutex::new(Session::new()),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// Whether the underlying communicator is connected.
    pub fn is_connected(&self) -> bool {
        self.communicator.is_connected()
    }

    /// Stream timing in use.
    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    // ==================== Discrete Commands ====================

    /// Sets linear (m/s) and angular (rad/s) velocity.
    ///
    /// # Errors
    ///
    /// Transport faults only; a rejection is returned as the `CommandResult`.
    pub async fn set_velocity(&self, linear: f64, angular: f64) -> Result<CommandResult> {
        self.communicator
            .send_command(&RoverCommand::SetVelocity { linear, angular })
            .await
    }

    /// Sets left and right track speeds.
    ///
    /// # Errors
    ///
    /// Transport faults only.
    pub async fn set_differential_speed(&self, left: f64, right: f64) -> Result<CommandResult> {
        self.communicator
            .send_command(&RoverCommand::SetDifferentialSpeed { left, right })
            .await
    }

    /// Controlled stop.
    ///
    /// # Errors
    ///
    /// Transport faults only.
    pub async fn stop(&self) -> Result<CommandResult> {
        self.communicator.send_command(&RoverCommand::Stop).await
    }

    /// Emergency stop.
    ///
    /// # Errors
    ///
    /// Transport faults only.
    pub async fn emergency_stop(&self) -> Result<CommandResult> {
        self.communicator
            .send_command(&RoverCommand::EmergencyStop)
            .await
    }

    /// Asks the rover to navigate to `(x, y)` and finish facing `yaw`.
    ///
    /// # Errors
    ///
    /// Transport faults only.
    pub async fn goto(&self, x: f64, y: f64, yaw: f64) -> Result<CommandResult> {
        self.communicator
            .send_command(&RoverCommand::Goto { x, y, yaw })
            .await
    }

    /// Cancels the active goto.
    ///
    /// # Errors
    ///
    /// Transport faults only.
    pub async fn goto_cancel(&self) -> Result<CommandResult> {
        self.communicator
            .send_command(&RoverCommand::GotoCancel)
            .await
    }

    // ==================== RC Stream ====================

    /// Live RC channels. Writes show up in the next streamed update.
    pub fn rc_channels(&self) -> &RcChannelsHandle {
        &self.rc_channels
    }

    /// Replaces all RC channels at once.
    pub fn set_rc_channels(&self, channels: &RcChannels) {
        self.rc_channels.store(channels);
    }

    /// Current session state.
    pub fn stream_state(&self) -> SessionState {
        lock(&self.session).state()
    }

    /// Whether an RC stream task is live.
    pub fn is_streaming(&self) -> bool {
        lock(&self.session).is_running()
    }

    /// Number of stream tasks spawned by this manager.
    pub fn sessions_started(&self) -> u64 {
        lock(&self.session).sessions_started()
    }

    /// Starts streaming RC channels on a new tokio task.
    ///
    /// Does nothing if a stream is already running. Returns once the task is
    /// scheduled. If a previous task ended on its own, its error is logged
    /// and discarded here; call [`stop_rc_stream`](Self::stop_rc_stream)
    /// first to observe it.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub async fn start_rc_stream(&self) {
        let _transition = self.transition.lock().await;

        let exited = {
            let mut session = lock(&self.session);
            match session.begin_start() {
                StartDecision::AlreadyRunning => {
                    debug!("RC stream already running");
                    return;
                }
                StartDecision::Spawn(exited) => exited,
            }
        };

        if let Some(exited) = exited {
            if let Err(e) = exited.join().await {
                warn!("Discarding failure of RC stream task that exited on its own: {}", e);
            }
        }

        let task = TaskLoop::spawn(
            Arc::clone(&self.communicator),
            self.rc_channels.clone(),
            self.settings,
        );
        lock(&self.session).finish_start(task);
        info!(
            "RC stream started ({:?} interval, task mode)",
            self.settings.interval
        );
    }

    /// Stops the RC stream and resets every channel to neutral.
    ///
    /// Waits for the task to exit. Safe to call when nothing is running.
    ///
    /// # Errors
    ///
    /// Whatever fault ended the loop: a transport error, a
    /// [`StreamRejected`](crate::error::GeodriveError::StreamRejected) limit,
    /// or a [`StreamTask`](crate::error::GeodriveError::StreamTask) panic.
    /// Channels are reset in every case.
    pub async fn stop_rc_stream(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        let task = lock(&self.session).begin_stop();
        self.rc_channels.reset();

        let Some(task) = task else {
            return Ok(());
        };

        let result = task.join().await;
        lock(&self.session).finish_stop();

        match &result {
            Ok(_) => info!("RC stream stopped"),
            Err(e) => info!("RC stream stopped after failure: {}", e),
        }
        result.map(|_| ())
    }

    /// Signals the stream task to stop and resets every channel, without waiting.
    ///
    /// For places that cannot await, such as `Drop`. The task still sends its
    /// final neutral update and exits on its own; a fault it ended with is
    /// logged instead of returned. Returns whether a task was signalled.
    pub fn detach_rc_stream(&self) -> bool {
        let task = {
            let mut session = lock(&self.session);
            let task = session.begin_stop();
            session.finish_stop();
            task
        };
        self.rc_channels.reset();

        let Some(task) = task else {
            return false;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = task.join().await {
                        warn!("Detached RC stream task failed: {}", e);
                    }
                });
            }
            Err(_) => debug!("No runtime to reap detached RC stream task"),
        }
        info!("RC stream detached");
        true
    }
}

impl<C: AsyncCommunicator + ?Sized + 'static> Drop for AsyncMovementManager<C> {
    fn drop(&mut self) {
        self.detach_rc_stream();
    }
}
