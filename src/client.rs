//! # Rover Client
//!
//! Facade over a communicator and its movement manager.
//!
//! [`RoverClient`] is the blocking flavour (RC stream on a worker thread),
//! [`AsyncRoverClient`] the tokio one. Both expose the one-shot commands and
//! queries directly and hand out the movement manager for everything else.
//!
//! ```no_run
//! use geodrive::client::RoverClient;
//! use geodrive::communicator::sim::SimulatedRover;
//! use geodrive::protocol::Channel;
//!
//! let client = RoverClient::new(SimulatedRover::new());
//! client.connect()?;
//! {
//!     let rc = client.rc_stream()?;
//!     rc.channels().set(Channel::Throttle, 1600)?;
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//! } // stream stopped, channels neutral
//! client.disconnect()?;
//! # Ok::<(), geodrive::error::GeodriveError>(())
//! ```

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::communicator::{AsyncCommunicator, Communicator, TelemetryIter, TelemetryStream};
use crate::config::Config;
use crate::error::Result;
use crate::movement::{AsyncMovementManager, MovementManager, StopOutcome};
use crate::protocol::{
    CommandResult, RcChannels, RcChannelsHandle, RoverCommand, RoverStatus, Telemetry,
};
use crate::stream::StreamSettings;

/// Blocking rover client.
#[derive(Debug)]
pub struct RoverClient<C: Communicator + 'static> {
    communicator: Arc<C>,
    movement: MovementManager<C>,
}

impl<C: Communicator + 'static> RoverClient<C> {
    /// Creates a client with default stream settings.
    pub fn new(communicator: C) -> Self {
        Self::with_settings(communicator, StreamSettings::default())
    }

    /// Creates a client with stream timing from `config`.
    pub fn from_config(communicator: C, config: &Config) -> Self {
        Self::with_settings(communicator, StreamSettings::from(&config.rc_stream))
    }

    pub fn with_settings(communicator: C, settings: StreamSettings) -> Self {
        let communicator = Arc::new(communicator);
        let movement = MovementManager::with_settings(Arc::clone(&communicator), settings);
        Self {
            communicator,
            movement,
        }
    }

    /// Underlying communicator
    pub fn communicator(&self) -> &C {
        &self.communicator
    }

    pub fn movement(&self) -> &MovementManager<C> {
        &self.movement
    }

    /// Opens the connection.
    ///
    /// # Errors
    ///
    /// Transport faults.
    pub fn connect(&self) -> Result<bool> {
        let connected = self.communicator.connect()?;
        info!("Rover connect -> {}", connected);
        Ok(connected)
    }

    /// Stops any RC stream, then closes the connection.
    ///
    /// # Errors
    ///
    /// Transport faults.
    pub fn disconnect(&self) -> Result<()> {
        self.movement.stop_rc_stream();
        self.communicator.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.communicator.is_connected()
    }

    /// See [`MovementManager::set_velocity`].
    ///
    /// # Errors
    ///
    /// Transport faults.
    pub fn set_velocity(&self, linear: f64, angular: f64) -> Result<CommandResult> {
        self.movement.set_velocity(linear, angular)
    }

    /// See [`MovementManager::goto`].
    ///
    /// # Errors
    ///
    /// Transport faults.
    pub fn goto(&self, x: f64, y: f64, yaw: f64) -> Result<CommandResult> {
        self.movement.goto(x, y, yaw)
    }

    /// # Errors
    ///
    /// Transport faults.
    pub fn beep(&self) -> Result<CommandResult> {
        self.communicator.send_command(&RoverCommand::Beep)
    }

    /// # Errors
    ///
    /// Transport faults.
    pub fn moo(&self) -> Result<CommandResult> {
        self.communicator.send_command(&RoverCommand::Moo)
    }

    /// # Errors
    ///
    /// Transport faults.
    pub fn get_telemetry(&self) -> Result<Telemetry> {
        self.communicator.get_telemetry()
    }

    /// Blocking telemetry feed; each `next()` waits for a sample.
    ///
    /// # Errors
    ///
    /// Transport faults when opening the feed.
    pub fn stream_telemetry(&self) -> Result<TelemetryIter> {
        self.communicator.stream_telemetry()
    }

    /// # Errors
    ///
    /// Transport faults.
    pub fn get_battery_voltage(&self) -> Result<f32> {
        self.communicator.get_battery_voltage()
    }

    /// # Errors
    ///
    /// Transport faults.
    pub fn get_status(&self) -> Result<RoverStatus> {
        self.communicator.get_status()
    }

    /// Replaces all RC channels; picked up by the next streamed update.
    pub fn set_rc_channels(&self, channels: &RcChannels) {
        self.movement.set_rc_channels(channels);
    }

    /// Starts the RC stream for the lifetime of the returned guard.
    ///
    /// Dropping the guard stops the stream and resets the channels.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn rc_stream(&self) -> Result<RcStreamGuard<'_, C>> {
        self.movement.start_rc_stream()?;
        Ok(RcStreamGuard {
            movement: &self.movement,
            active: true,
        })
    }
}

/// Keeps the RC stream running until dropped.
#[derive(Debug)]
#[must_use = "the RC stream stops as soon as the guard is dropped"]
pub struct RcStreamGuard<'a, C: Communicator + 'static> {
    movement: &'a MovementManager<C>,
    active: bool,
}

impl<C: Communicator + 'static> RcStreamGuard<'_, C> {
    /// Live channels of the running stream
    pub fn channels(&self) -> &RcChannelsHandle {
        self.movement.rc_channels()
    }

    /// Stops now and reports how the loop ended.
    pub fn stop(mut self) -> StopOutcome {
        self.active = false;
        self.movement.stop_rc_stream()
    }
}

impl<C: Communicator + 'static> Drop for RcStreamGuard<'_, C> {
    fn drop(&mut self) {
        if self.active {
            self.movement.stop_rc_stream();
        }
    }
}

/// Async rover client.
#[derive(Debug)]
pub struct AsyncRoverClient<C: AsyncCommunicator + 'static> {
    communicator: Arc<C>,
    movement: AsyncMovementManager<C>,
}

impl<C: AsyncCommunicator + 'static> AsyncRoverClient<C> {
    pub fn new(communicator: C) -> Self {
        Self::with_settings(communicator, StreamSettings::default())
    }

    /// Creates a client with stream timing from `config`.
    pub fn from_config(communicator: C, config: &Config) -> Self {
        Self::with_settings(communicator, StreamSettings::from(&config.rc_stream))
    }

    pub fn with_settings(communicator: C, settings: StreamSettings) -> Self {
        let communicator = Arc::new(communicator);
        let movement = AsyncMovementManager::with_settings(Arc::clone(&communicator), settings);
        Self {
            communicator,
            movement,
        }
    }

    pub fn communicator(&self) -> &C {
        &self.communicator
    }

    pub fn movement(&self) -> &AsyncMovementManager<C> {
        &self.movement
    }

    /// # Errors
    ///
    /// Transport faults.
    pub async fn connect(&self) -> Result<bool> {
        let connected = self.communicator.connect().await?;
        info!("Rover connect -> {}", connected);
        Ok(connected)
    }

    /// Stops any RC stream, then closes the connection.
    ///
    /// A fault that ended the stream is logged by the manager and does not
    /// prevent the disconnect.
    ///
    /// # Errors
    ///
    /// Transport faults from the disconnect itself.
    pub async fn disconnect(&self) -> Result<()> {
        if let Err(e) = self.movement.stop_rc_stream().await {
            warn!("RC stream had failed before disconnect: {}", e);
        }
        self.communicator.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.communicator.is_connected()
    }

    /// # Errors
    ///
    /// Transport faults.
    pub async fn set_velocity(&self, linear: f64, angular: f64) -> Result<CommandResult> {
        self.movement.set_velocity(linear, angular).await
    }

    /// # Errors
    ///
    /// Transport faults.
    pub async fn goto(&self, x: f64, y: f64, yaw: f64) -> Result<CommandResult> {
        self.movement.goto(x, y, yaw).await
    }

    /// # Errors
    ///
    /// Transport faults.
    pub async fn beep(&self) -> Result<CommandResult> {
        self.communicator.send_command(&RoverCommand::Beep).await
    }

    /// # Errors
    ///
    /// Transport faults.
    pub async fn moo(&self) -> Result<CommandResult> {
        self.communicator.send_command(&RoverCommand::Moo).await
    }

    /// # Errors
    ///
    /// Transport faults.
    pub async fn get_telemetry(&self) -> Result<Telemetry> {
        self.communicator.get_telemetry().await
    }

    /// # Errors
    ///
    /// Transport faults when opening the feed.
    pub async fn stream_telemetry(&self) -> Result<TelemetryStream> {
        self.communicator.stream_telemetry().await
    }

    /// # Errors
    ///
    /// Transport faults.
    pub async fn get_battery_voltage(&self) -> Result<f32> {
        self.communicator.get_battery_voltage().await
    }

    /// # Errors
    ///
    /// Transport faults.
    pub async fn get_status(&self) -> Result<RoverStatus> {
        self.communicator.get_status().await
    }

    /// Replaces all RC channels; picked up by the next streamed update.
    pub fn set_rc_channels(&self, channels: &RcChannels) {
        self.movement.set_rc_channels(channels);
    }

    /// Runs `f` with the RC stream active and stops it afterwards.
    ///
    /// `f` receives the live channel handle. The stream is stopped and the
    /// channels reset once `f` completes, and also when the returned future
    /// is dropped early (timeout, `select!`, task abort). In that case the
    /// stop is signalled without waiting for the task.
    ///
    /// # Errors
    ///
    /// The fault that ended the stream, if any, after `f` has completed.
    pub async fn with_rc_stream<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(RcChannelsHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        self.movement.start_rc_stream().await;
        let scope = RcStreamScope {
            movement: &self.movement,
            completed: false,
        };
        let output = f(self.movement.rc_channels().clone()).await;
        let stopped = self.movement.stop_rc_stream().await;
        scope.complete();
        stopped?;
        Ok(output)
    }
}

/// Detaches the stream if a [`AsyncRoverClient::with_rc_stream`] future is
/// dropped before its own stop ran.
struct RcStreamScope<'a, C: AsyncCommunicator + 'static> {
    movement: &'a AsyncMovementManager<C>,
    completed: bool,
}

impl<C: AsyncCommunicator + 'static> RcStreamScope<'_, C> {
    fn complete(mut self) {
        self.completed = true;
    }
}

impl<C: AsyncCommunicator + 'static> Drop for RcStreamScope<'_, C> {
    fn drop(&mut self) {
        if !self.completed && self.movement.detach_rc_stream() {
            warn!("RC stream scope cancelled, stream signalled to stop");
        }
    }
}
