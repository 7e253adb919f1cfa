//! # Thread-Based Movement Manager
//!
//! Blocking motion commands plus an RC stream running on a worker thread.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use geodrive::communicator::{sim::SimulatedRover, Communicator};
//! use geodrive::movement::MovementManager;
//! use geodrive::protocol::Channel;
//!
//! let rover = Arc::new(SimulatedRover::new());
//! rover.connect()?;
//!
//! let movement = MovementManager::new(rover);
//! movement.start_rc_stream()?;
//! movement.rc_channels().set(Channel::Throttle, 1600)?;
//! std::thread::sleep(Duration::from_secs(1));
//! movement.stop_rc_stream(); // all channels back to 1500
//! # Ok::<(), geodrive::error::GeodriveError>(())
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use super::StopOutcome;
use crate::communicator::Communicator;
use crate::error::Result;
use crate::protocol::{CommandResult, RcChannels, RcChannelsHandle, RoverCommand};
use crate::stream::session::{Session, SessionState, StartDecision};
use crate::stream::worker::{JoinFailure, WorkerLoop};
use crate::stream::StreamSettings;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-based movement manager.
pub struct MovementManager<C: Communicator + ?Sized + 'static> {
    communicator: Arc<C>,
    rc_channels: RcChannelsHandle,
    settings: StreamSettings,
    session: Mutex<Session<WorkerLoop>>,
    /// Serializes whole start/stop transitions
    transition: Mutex<()>,
}

impl<C: Communicator + ?Sized + 'static> std::fmt::Debug for MovementManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MovementManager")
            .field("rc_channels", &self.rc_channels.snapshot())
            .field("settings", &self.settings)
            .field("stream_state", &self.stream_state())
            .finish_non_exhaustive()
    }
}

impl<C: Communicator + ?Sized + 'static> MovementManager<C> {
    /// Creates a manager with default stream settings (20 Hz, 2 s stop timeout).
    pub fn new(communicator: Arc<C>) -> Self {
        Self::with_settings(communicator, StreamSettings::default())
    }

    /// Creates a manager with explicit stream settings.
    pub fn with_settings(communicator: Arc<C>, settings: StreamSettings) -> Self {
        Self {
            communicator,
            rc_channels: RcChannelsHandle::new(),
            settings,
            session: Mutex::new(Session::new()),
            transition: Mutex::new(()),
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
    pub fn set_velocity(&self, linear: f64, angular: f64) -> Result<CommandResult> {
        self.communicator
            .send_command(&RoverCommand::SetVelocity { linear, angular })
    }

    /// Sets left and right track speeds.
    ///
    /// # Errors
    ///
    /// Transport faults only.
    pub fn set_differential_speed(&self, left: f64, right: f64) -> Result<CommandResult> {
        self.communicator
            .send_command(&RoverCommand::SetDifferentialSpeed { left, right })
    }

    /// Controlled stop.
    ///
    /// # Errors
    ///
    /// Transport faults only.
    pub fn stop(&self) -> Result<CommandResult> {
        self.communicator.send_command(&RoverCommand::Stop)
    }

    /// Emergency stop.
    ///
    /// # Errors
    ///
    /// Transport faults only.
    pub fn emergency_stop(&self) -> Result<CommandResult> {
        self.communicator.send_command(&RoverCommand::EmergencyStop)
    }

    /// Asks the rover to navigate to `(x, y)` and finish facing `yaw`.
    ///
    /// # Errors
    ///
    /// Transport faults only.
    pub fn goto(&self, x: f64, y: f64, yaw: f64) -> Result<CommandResult> {
        self.communicator
            .send_command(&RoverCommand::Goto { x, y, yaw })
    }

    /// Cancels the active goto.
    ///
    /// # Errors
    ///
    /// Transport faults only.
    pub fn goto_cancel(&self) -> Result<CommandResult> {
        self.communicator.send_command(&RoverCommand::GotoCancel)
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

    /// Whether an RC stream loop is live.
    pub fn is_streaming(&self) -> bool {
        lock(&self.session).is_running()
    }

    /// Number of stream loops spawned by this manager.
    pub fn sessions_started(&self) -> u64 {
        lock(&self.session).sessions_started()
    }

    /// Starts streaming RC channels on a worker thread.
    ///
    /// Does nothing if a stream is already running. Returns once the thread
    /// has been spawned.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be created.
    pub fn start_rc_stream(&self) -> Result<()> {
        let _transition = lock(&self.transition);
        let mut session = lock(&self.session);

        match session.begin_start() {
            StartDecision::AlreadyRunning => {
                debug!("RC stream already running");
                return Ok(());
            }
            StartDecision::Spawn(Some(_exited)) => {
                debug!("Discarding RC stream thread that exited on its own");
            }
            StartDecision::Spawn(None) => {}
        }

        match WorkerLoop::spawn(
            Arc::clone(&self.communicator),
            self.rc_channels.clone(),
            self.settings,
        ) {
            Ok(worker) => {
                session.finish_start(worker);
                info!(
                    "RC stream started ({:?} interval, thread mode)",
                    self.settings.interval
                );
                Ok(())
            }
            Err(e) => {
                session.abort_start();
                Err(e)
            }
        }
    }

    /// Stops the RC stream and resets every channel to neutral.
    ///
    /// Waits at most `stop_timeout` for the worker thread. A thread that does
    /// not exit in time is abandoned with a warning. Safe to call when
    /// nothing is running. Faults that ended the loop were already logged by
    /// the thread and are not reported here.
    pub fn stop_rc_stream(&self) -> StopOutcome {
        let _transition = lock(&self.transition);
        let worker = lock(&self.session).begin_stop();
        self.rc_channels.reset();

        let Some(worker) = worker else {
            return StopOutcome::NotRunning;
        };

        let outcome = match worker.join(self.settings.stop_timeout) {
            Ok(()) => StopOutcome::Stopped,
            Err(JoinFailure::TimedOut) => {
                warn!(
                    "RC stream thread didn't stop within {:?}, abandoning it",
                    self.settings.stop_timeout
                );
                StopOutcome::TimedOut
            }
            Err(JoinFailure::Panicked) => {
                error!("RC stream thread panicked");
                StopOutcome::Stopped
            }
        };

        lock(&self.session).finish_stop();
        info!("RC stream stopped ({:?})", outcome);
        outcome
    }
}

impl<C: Communicator + ?Sized + 'static> Drop for MovementManager<C> {
    fn drop(&mut self) {
        self.stop_rc_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::mocks::RecordingRover;
    use crate::communicator::MockCommunicator;
    use crate::error::GeodriveError;
    use crate::protocol::Channel;
    use std::thread::sleep;
    use std::time::{Duration, Instant};

    const TICK: Duration = Duration::from_millis(20);

    /// Polls until the loop is gone and returns when that was first seen.
    fn wait_until_idle(manager: &MovementManager<RecordingRover>, limit: Duration) -> Instant {
        let deadline = Instant::now() + limit;
        while manager.is_streaming() {
            assert!(Instant::now() < deadline, "stream still running after {:?}", limit);
            sleep(Duration::from_millis(1));
        }
        Instant::now()
    }

    fn manager_with(rover: &RecordingRover) -> MovementManager<RecordingRover> {
        let settings = StreamSettings::default()
            .with_interval(TICK)
            .with_stop_timeout(Duration::from_secs(2));
        MovementManager::with_settings(Arc::new(rover.clone()), settings)
    }

    // ==================== Discrete Command Tests ====================

    #[test]
    fn test_set_velocity_dispatches_once_and_returns_result_unchanged() {
        let mut mock = MockCommunicator::new();
        mock.expect_send_command()
            .withf(|cmd| {
                *cmd == RoverCommand::SetVelocity {
                    linear: 1.0,
                    angular: 0.0,
                }
            })
            .times(1)
            .returning(|_| Ok(CommandResult::failed("Motors disarmed", Some("DISARMED"))));

        let manager = MovementManager::new(Arc::new(mock));
        let result = manager.set_velocity(1.0, 0.0).unwrap();
        assert_eq!(
            result,
            CommandResult::failed("Motors disarmed", Some("DISARMED"))
        );
    }

    #[test]
    fn test_transport_fault_propagates_from_command() {
        let mut mock = MockCommunicator::new();
        mock.expect_send_command()
            .times(1)
            .returning(|_| Err(GeodriveError::Transport("connection reset".to_string())));

        let manager = MovementManager::new(Arc::new(mock));
        assert!(matches!(
            manager.emergency_stop(),
            Err(GeodriveError::Transport(_))
        ));
    }

    #[test]
    fn test_each_command_maps_to_one_dispatch() {
        let rover = RecordingRover::new();
        let manager = manager_with(&rover);

        manager.set_differential_speed(0.2, -0.2).unwrap();
        manager.stop().unwrap();
        manager.emergency_stop().unwrap();
        manager.goto(1.0, 2.0, 0.5).unwrap();
        manager.goto_cancel().unwrap();

        assert_eq!(
            rover.sent_commands(),
            vec![
                RoverCommand::SetDifferentialSpeed {
                    left: 0.2,
                    right: -0.2
                },
                RoverCommand::Stop,
                RoverCommand::EmergencyStop,
                RoverCommand::Goto {
                    x: 1.0,
                    y: 2.0,
                    yaw: 0.5
                },
                RoverCommand::GotoCancel,
            ]
        );
    }

    #[test]
    fn test_is_connected_delegates() {
        let mut mock = MockCommunicator::new();
        mock.expect_is_connected().times(1).return_const(true);
        let manager = MovementManager::new(Arc::new(mock));
        assert!(manager.is_connected());
    }

    // ==================== RC Stream Tests ====================

    #[test]
    fn test_stream_sends_live_values_then_stops_cleanly() {
        let rover = RecordingRover::new();
        let manager = manager_with(&rover);

        manager.rc_channels().set(Channel::Yaw, 1600).unwrap();
        manager.start_rc_stream().unwrap();
        assert!(manager.is_streaming());
        sleep(TICK * 5);

        let frames = rover.frames();
        assert!(frames.len() >= 2, "expected at least 2 updates, got {}", frames.len());
        assert!(frames.iter().all(|f| f.get(Channel::Yaw) == 1600));

        let times = rover.frame_times();
        let gap = times[1].duration_since(times[0]);
        assert!(gap >= TICK / 2, "updates too close together: {:?}", gap);
        assert!(gap <= TICK * 3, "updates too far apart: {:?}", gap);

        assert_eq!(manager.stop_rc_stream(), StopOutcome::Stopped);
        assert!(!manager.is_streaming());
        assert_eq!(manager.stream_state(), SessionState::Idle);
        assert_eq!(manager.rc_channels().get(Channel::Yaw), 1500);

        let after_stop = rover.frame_count();
        assert_eq!(rover.frames().last(), Some(&RcChannels::neutral()));
        sleep(TICK * 3);
        assert_eq!(rover.frame_count(), after_stop, "updates sent after stop");
    }

    #[test]
    fn test_live_mutation_visible_next_tick() {
        let rover = RecordingRover::new();
        let manager = manager_with(&rover);

        manager.start_rc_stream().unwrap();
        sleep(TICK * 2);
        manager.rc_channels().set(Channel::Throttle, 1900).unwrap();
        sleep(TICK * 3);
        manager.stop_rc_stream();

        assert!(rover
            .frames()
            .iter()
            .any(|f| f.get(Channel::Throttle) == 1900));
    }

    #[test]
    fn test_double_start_runs_one_loop() {
        let rover = RecordingRover::new();
        let manager = manager_with(&rover);

        manager.start_rc_stream().unwrap();
        manager.start_rc_stream().unwrap();
        sleep(TICK * 5);
        manager.stop_rc_stream();

        assert_eq!(manager.sessions_started(), 1);
        // One loop sends ~6 updates in 5 ticks plus the final neutral; two would double it
        assert!(rover.frame_count() <= 9, "got {} updates", rover.frame_count());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let rover = RecordingRover::new();
        let manager = manager_with(&rover);

        assert_eq!(manager.stop_rc_stream(), StopOutcome::NotRunning);
        assert_eq!(manager.stop_rc_stream(), StopOutcome::NotRunning);
        assert_eq!(rover.frame_count(), 0);
    }

    #[test]
    fn test_stop_resets_channels_on_timeout() {
        let rover = RecordingRover::new();
        rover.set_rc_delay(Duration::from_millis(400));
        let settings = StreamSettings::default()
            .with_interval(TICK)
            .with_stop_timeout(Duration::from_millis(20));
        let manager = MovementManager::with_settings(Arc::new(rover.clone()), settings);

        manager
            .set_rc_channels(&RcChannels::new([1100, 1200, 1300, 1400, 1600, 1700, 1800, 1900]).unwrap());
        manager.start_rc_stream().unwrap();
        sleep(TICK);

        assert_eq!(manager.stop_rc_stream(), StopOutcome::TimedOut);
        assert!(manager.rc_channels().snapshot().is_neutral());
        assert_eq!(manager.stream_state(), SessionState::Idle);
    }

    #[test]
    fn test_transport_fault_ends_stream() {
        let rover = RecordingRover::new();
        rover.set_fail_rc_after(2);
        let manager = manager_with(&rover);

        manager.start_rc_stream().unwrap();
        let idle_at = wait_until_idle(&manager, Duration::from_secs(2));
        let fault_at = rover.fault_time().expect("third update should fail");
        let reaction = idle_at.saturating_duration_since(fault_at);
        assert!(reaction <= TICK, "loop outlived the fault by {:?}", reaction);

        assert_eq!(manager.stream_state(), SessionState::Idle);
        assert_eq!(rover.frame_count(), 2);

        // Fault was logged by the thread; stop just reaps it
        assert_eq!(manager.stop_rc_stream(), StopOutcome::Stopped);
    }

    #[test]
    fn test_restart_after_fault() {
        let rover = RecordingRover::new();
        rover.set_fail_rc_after(1);
        let manager = manager_with(&rover);

        manager.start_rc_stream().unwrap();
        sleep(TICK * 3);
        assert!(!manager.is_streaming());

        *rover.fail_rc_after.lock().unwrap() = None;
        manager.start_rc_stream().unwrap();
        assert!(manager.is_streaming());
        assert_eq!(manager.sessions_started(), 2);
        manager.stop_rc_stream();
    }

    #[test]
    fn test_rejected_updates_keep_streaming() {
        let rover = RecordingRover::new();
        rover.set_reject_rc(true);
        let manager = manager_with(&rover);

        manager.start_rc_stream().unwrap();
        sleep(TICK * 4);
        assert!(manager.is_streaming());
        assert_eq!(manager.stop_rc_stream(), StopOutcome::Stopped);
    }

    #[test]
    fn test_drop_stops_stream() {
        let rover = RecordingRover::new();
        {
            let manager = manager_with(&rover);
            manager.start_rc_stream().unwrap();
            sleep(TICK * 2);
        }
        let count = rover.frame_count();
        assert_eq!(rover.frames().last(), Some(&RcChannels::neutral()));
        sleep(TICK * 3);
        assert_eq!(rover.frame_count(), count);
    }
}
