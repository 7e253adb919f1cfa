//! # Simulated Rover
//!
//! In-memory rover implementing both [`Communicator`] and [`AsyncCommunicator`].
//!
//! The simulation is a unicycle model integrated over wall time:
//! - `SetVelocity` / `SetDifferentialSpeed` set the body velocity
//! - `Goto` drives straight at the target at [`GOTO_SPEED`] and takes its yaw on arrival
//! - RC frames map throttle (CH3) to linear and yaw (CH1) to angular velocity
//! - `Stop` / `EmergencyStop` zero everything
//!
//! Useful for demos and for exercising managers without hardware.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use super::{
    AsyncCommunicator, Communicator, RcAckStream, RcUpdateStream, TelemetryIter, TelemetryStream,
};
use crate::error::{GeodriveError, Result};
use crate::protocol::channels::{RC_CHANNEL_VALUE_MAX, RC_CHANNEL_VALUE_NEUTRAL};
use crate::protocol::{Channel, CommandResult, RcAck, RcChannels, RoverCommand, RoverStatus, Telemetry};

/// Distance between tracks in meters
pub const TRACK_WIDTH_M: f64 = 0.3;

/// Linear speed at full RC throttle (m/s)
pub const MAX_LINEAR_SPEED: f64 = 1.0;

/// Angular speed at full RC yaw (rad/s)
pub const MAX_ANGULAR_SPEED: f64 = 2.0;

/// Cruise speed while executing a goto (m/s)
pub const GOTO_SPEED: f64 = 0.5;

/// Fully charged battery voltage
const BATTERY_FULL_V: f32 = 12.6;

/// Battery cut-off voltage
const BATTERY_EMPTY_V: f32 = 10.5;

/// Simulated drain per second of uptime
const BATTERY_DRAIN_V_PER_S: f32 = 0.0005;

/// Default spacing between telemetry samples
const DEFAULT_TELEMETRY_PERIOD: Duration = Duration::from_millis(100);

const FIRMWARE_VERSION: &str = "sim-1.0.0";

#[derive(Debug, Clone, Copy)]
struct GotoTarget {
    x: f64,
    y: f64,
    yaw: f64,
}

#[derive(Debug)]
struct SimState {
    connected: bool,
    started_at: Instant,
    last_update: Instant,
    x: f64,
    y: f64,
    yaw: f64,
    linear: f64,
    angular: f64,
    goal: Option<GotoTarget>,
    state: &'static str,
    rc_frames: u64,
    last_rc: RcChannels,
}

impl SimState {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            connected: false,
            started_at: now,
            last_update: now,
            x: 0.0,
            y: 0.0,
            yaw: 0.0,
            linear: 0.0,
            angular: 0.0,
            goal: None,
            state: "idle",
            rc_frames: 0,
            last_rc: RcChannels::neutral(),
        }
    }

    /// Integrates motion up to now.
    fn advance(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        if let Some(goal) = self.goal {
            let dx = goal.x - self.x;
            let dy = goal.y - self.y;
            let distance = dx.hypot(dy);
            let step = GOTO_SPEED * dt;
            if distance <= step {
                self.x = goal.x;
                self.y = goal.y;
                self.yaw = goal.yaw;
                self.linear = 0.0;
                self.goal = None;
                self.state = "idle";
            } else {
                self.yaw = dy.atan2(dx);
                self.x += dx / distance * step;
                self.y += dy / distance * step;
                self.linear = GOTO_SPEED;
            }
            self.angular = 0.0;
            return;
        }

        self.yaw += self.angular * dt;
        self.x += self.linear * self.yaw.cos() * dt;
        self.y += self.linear * self.yaw.sin() * dt;
    }

    fn telemetry(&self) -> Telemetry {
        Telemetry {
            position: [self.x, self.y, 0.0],
            velocity: [self.linear * self.yaw.cos(), self.linear * self.yaw.sin(), 0.0],
            attitude: [0.0, 0.0, self.yaw],
        }
    }

    fn apply(&mut self, command: &RoverCommand) -> CommandResult {
        if command.params().iter().any(|(_, value)| !value.is_finite()) {
            return CommandResult::failed(
                format!("{} parameters must be finite", command.kind()),
                Some("INVALID_PARAM"),
            );
        }

        match *command {
            RoverCommand::SetVelocity { linear, angular } => {
                self.goal = None;
                self.linear = linear;
                self.angular = angular;
                self.state = "moving";
            }
            RoverCommand::SetDifferentialSpeed { left, right } => {
                self.goal = None;
                self.linear = (left + right) / 2.0;
                self.angular = (right - left) / TRACK_WIDTH_M;
                self.state = "moving";
            }
            RoverCommand::Stop => {
                self.halt();
                self.state = "idle";
            }
            RoverCommand::EmergencyStop => {
                self.halt();
                self.state = "emergency_stop";
            }
            RoverCommand::Goto { x, y, yaw } => {
                self.goal = Some(GotoTarget { x, y, yaw });
                self.state = "navigating";
            }
            RoverCommand::GotoCancel => {
                if self.goal.take().is_none() {
                    return CommandResult::failed("No active goto", Some("NO_GOTO"));
                }
                self.halt();
                self.state = "idle";
            }
            RoverCommand::Beep | RoverCommand::Moo => {}
        }

        CommandResult::ok(format!("{} accepted", command.kind()))
    }

    fn halt(&mut self) {
        self.linear = 0.0;
        self.angular = 0.0;
        self.goal = None;
    }

    fn apply_rc(&mut self, channels: &RcChannels) {
        let scale = f64::from(RC_CHANNEL_VALUE_MAX - RC_CHANNEL_VALUE_NEUTRAL);
        let axis = |channel: Channel| {
            (f64::from(channels.get(channel)) - f64::from(RC_CHANNEL_VALUE_NEUTRAL)) / scale
        };

        self.goal = None;
        self.linear = axis(Channel::Throttle) * MAX_LINEAR_SPEED;
        self.angular = axis(Channel::Yaw) * MAX_ANGULAR_SPEED;
        self.state = if channels.is_neutral() { "idle" } else { "manual" };
        self.rc_frames += 1;
        self.last_rc = *channels;
    }

    fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// In-memory rover.
///
/// Cheap to clone; clones drive the same simulated rover.
#[derive(Debug, Clone)]
pub struct SimulatedRover {
    state: Arc<Mutex<SimState>>,
    telemetry_period: Duration,
}

impl Default for SimulatedRover {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRover {
    /// Creates a disconnected rover at the origin.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
            telemetry_period: DEFAULT_TELEMETRY_PERIOD,
        }
    }

    /// Sets the spacing between samples of the telemetry feeds.
    #[must_use]
    pub fn with_telemetry_period(mut self, period: Duration) -> Self {
        self.telemetry_period = period;
        self
    }

    /// Number of RC frames received so far.
    #[must_use]
    pub fn rc_frames_received(&self) -> u64 {
        self.lock().rc_frames
    }

    /// Last RC frame received.
    #[must_use]
    pub fn last_rc_channels(&self) -> RcChannels {
        self.lock().last_rc
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connected_state(&self) -> Result<MutexGuard<'_, SimState>> {
        let mut state = self.lock();
        if !state.connected {
            return Err(GeodriveError::NotConnected);
        }
        state.advance();
        Ok(state)
    }

    fn set_connected(&self, connected: bool) {
        let mut state = self.lock();
        state.advance();
        if !connected {
            state.halt();
        }
        state.connected = connected;
        info!("Simulated rover {}", if connected { "connected" } else { "disconnected" });
    }

    fn dispatch(&self, command: &RoverCommand) -> Result<CommandResult> {
        let result = self.connected_state()?.apply(command);
        debug!("Simulated {} -> success={}", command.kind(), result.success);
        Ok(result)
    }

    fn telemetry(&self) -> Result<Telemetry> {
        Ok(self.connected_state()?.telemetry())
    }

    fn push_rc(&self, channels: &RcChannels) -> Result<RcAck> {
        self.connected_state()?.apply_rc(channels);
        Ok(RcAck::accepted())
    }

    fn battery_voltage(&self) -> Result<f32> {
        let state = self.connected_state()?;
        let drained = BATTERY_FULL_V - state.uptime().as_secs_f32() * BATTERY_DRAIN_V_PER_S;
        Ok(drained.max(BATTERY_EMPTY_V))
    }

    fn status(&self) -> Result<RoverStatus> {
        let state = self.connected_state()?;
        Ok(RoverStatus {
            is_connected: state.connected,
            mode: if state.goal.is_some() { "auto" } else { "manual" }.to_string(),
            state: state.state.to_string(),
            uptime_s: state.uptime().as_secs(),
            errors: Vec::new(),
            firmware_version: FIRMWARE_VERSION.to_string(),
        })
    }
}

impl Communicator for SimulatedRover {
    fn connect(&self) -> Result<bool> {
        self.set_connected(true);
        Ok(true)
    }

    fn disconnect(&self) -> Result<()> {
        self.set_connected(false);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn send_command(&self, command: &RoverCommand) -> Result<CommandResult> {
        self.dispatch(command)
    }

    fn get_telemetry(&self) -> Result<Telemetry> {
        self.telemetry()
    }

    fn stream_telemetry(&self) -> Result<TelemetryIter> {
        self.telemetry()?;
        let rover = self.clone();
        let mut first = true;
        let mut failed = false;
        Ok(Box::new(std::iter::from_fn(move || {
            if failed {
                return None;
            }
            if !first {
                std::thread::sleep(rover.telemetry_period);
            }
            first = false;
            let sample = rover.telemetry();
            failed = sample.is_err();
            Some(sample)
        })))
    }

    fn stream_rc_channels(&self, channels: &RcChannels) -> Result<RcAck> {
        self.push_rc(channels)
    }

    fn get_battery_voltage(&self) -> Result<f32> {
        self.battery_voltage()
    }

    fn get_status(&self) -> Result<RoverStatus> {
        self.status()
    }
}

#[async_trait]
impl AsyncCommunicator for SimulatedRover {
    async fn connect(&self) -> Result<bool> {
        self.set_connected(true);
        Ok(true)
    }

    async fn disconnect(&self) -> Result<()> {
        self.set_connected(false);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn send_command(&self, command: &RoverCommand) -> Result<CommandResult> {
        self.dispatch(command)
    }

    async fn get_telemetry(&self) -> Result<Telemetry> {
        self.telemetry()
    }

    async fn stream_telemetry(&self) -> Result<TelemetryStream> {
        self.telemetry()?;
        let rover = self.clone();
        let mut ticker = tokio::time::interval(self.telemetry_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Ok(futures::stream::unfold((rover, ticker, false), |(rover, mut ticker, failed)| async move {
            if failed {
                return None;
            }
            ticker.tick().await;
            let sample = rover.telemetry();
            let failed = sample.is_err();
            Some((sample, (rover, ticker, failed)))
        })
        .boxed())
    }

    async fn stream_rc_channels(&self, updates: RcUpdateStream) -> Result<RcAckStream> {
        if !AsyncCommunicator::is_connected(self) {
            return Err(GeodriveError::NotConnected);
        }
        let rover = self.clone();
        Ok(updates.map(move |channels| rover.push_rc(&channels)).boxed())
    }

    async fn get_battery_voltage(&self) -> Result<f32> {
        self.battery_voltage()
    }

    async fn get_status(&self) -> Result<RoverStatus> {
        self.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_rover() -> SimulatedRover {
        let rover = SimulatedRover::new().with_telemetry_period(Duration::from_millis(5));
        Communicator::connect(&rover).unwrap();
        rover
    }

    #[test]
    fn test_commands_require_connection() {
        let rover = SimulatedRover::new();
        let result = Communicator::send_command(&rover, &RoverCommand::Stop);
        assert!(matches!(result, Err(GeodriveError::NotConnected)));
        assert!(Communicator::get_telemetry(&rover).is_err());
    }

    #[test]
    fn test_connect_disconnect() {
        let rover = SimulatedRover::new();
        assert!(!Communicator::is_connected(&rover));
        assert!(Communicator::connect(&rover).unwrap());
        assert!(Communicator::is_connected(&rover));
        Communicator::disconnect(&rover).unwrap();
        assert!(!Communicator::is_connected(&rover));
    }

    #[test]
    fn test_velocity_moves_rover_forward() {
        let rover = connected_rover();
        let result = Communicator::send_command(
            &rover,
            &RoverCommand::SetVelocity {
                linear: 1.0,
                angular: 0.0,
            },
        )
        .unwrap();
        assert!(result.success);

        std::thread::sleep(Duration::from_millis(50));
        let telemetry = Communicator::get_telemetry(&rover).unwrap();
        assert!(telemetry.position[0] > 0.0);
        assert!(telemetry.position[1].abs() < 1e-9);
        assert!((telemetry.velocity[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_differential_speed_turns_in_place() {
        let rover = connected_rover();
        Communicator::send_command(
            &rover,
            &RoverCommand::SetDifferentialSpeed {
                left: -0.3,
                right: 0.3,
            },
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        let telemetry = Communicator::get_telemetry(&rover).unwrap();
        assert!(telemetry.attitude[2] > 0.0, "positive yaw for right > left");
        assert!(telemetry.velocity[0].abs() < 1e-9);
    }

    #[test]
    fn test_stop_zeroes_velocity() {
        let rover = connected_rover();
        Communicator::send_command(
            &rover,
            &RoverCommand::SetVelocity {
                linear: 0.5,
                angular: 0.1,
            },
        )
        .unwrap();
        Communicator::send_command(&rover, &RoverCommand::Stop).unwrap();

        let telemetry = Communicator::get_telemetry(&rover).unwrap();
        assert_eq!(telemetry.velocity, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_emergency_stop_reported_in_status() {
        let rover = connected_rover();
        Communicator::send_command(&rover, &RoverCommand::EmergencyStop).unwrap();
        let status = Communicator::get_status(&rover).unwrap();
        assert_eq!(status.state, "emergency_stop");
        assert_eq!(status.firmware_version, FIRMWARE_VERSION);
    }

    #[test]
    fn test_goto_reaches_target() {
        let rover = connected_rover();
        Communicator::send_command(
            &rover,
            &RoverCommand::Goto {
                x: 0.01,
                y: 0.0,
                yaw: 1.0,
            },
        )
        .unwrap();
        assert_eq!(Communicator::get_status(&rover).unwrap().mode, "auto");

        std::thread::sleep(Duration::from_millis(60));
        let telemetry = Communicator::get_telemetry(&rover).unwrap();
        assert!((telemetry.position[0] - 0.01).abs() < 1e-9);
        assert!((telemetry.attitude[2] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_goto_cancel_without_goal_is_rejected() {
        let rover = connected_rover();
        let result = Communicator::send_command(&rover, &RoverCommand::GotoCancel).unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("NO_GOTO"));
    }

    #[test]
    fn test_non_finite_parameters_rejected() {
        let rover = connected_rover();
        let result = Communicator::send_command(
            &rover,
            &RoverCommand::SetVelocity {
                linear: f64::NAN,
                angular: 0.0,
            },
        )
        .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("INVALID_PARAM"));
    }

    #[test]
    fn test_rc_frame_drives_rover() {
        let rover = connected_rover();
        let channels = RcChannels::neutral().with(Channel::Throttle, 2000).unwrap();
        let ack = Communicator::stream_rc_channels(&rover, &channels).unwrap();
        assert!(ack.success);
        assert_eq!(rover.rc_frames_received(), 1);
        assert_eq!(rover.last_rc_channels(), channels);

        let telemetry = Communicator::get_telemetry(&rover).unwrap();
        assert!((telemetry.velocity[0] - MAX_LINEAR_SPEED).abs() < 1e-9);
    }

    #[test]
    fn test_blocking_telemetry_feed_is_restartable() {
        let rover = connected_rover();
        let first: Vec<_> = Communicator::stream_telemetry(&rover).unwrap().take(3).collect();
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|sample| sample.is_ok()));

        let second: Vec<_> = Communicator::stream_telemetry(&rover).unwrap().take(2).collect();
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_blocking_telemetry_feed_ends_after_disconnect() {
        let rover = connected_rover();
        let mut feed = Communicator::stream_telemetry(&rover).unwrap();
        assert!(feed.next().unwrap().is_ok());

        Communicator::disconnect(&rover).unwrap();
        assert!(matches!(feed.next(), Some(Err(GeodriveError::NotConnected))));
        assert!(feed.next().is_none());
    }

    #[test]
    fn test_battery_voltage_in_range() {
        let rover = connected_rover();
        let voltage = Communicator::get_battery_voltage(&rover).unwrap();
        assert!((BATTERY_EMPTY_V..=BATTERY_FULL_V).contains(&voltage));
    }

    #[tokio::test]
    async fn test_async_rc_stream_acks_each_update() {
        let rover = SimulatedRover::new();
        AsyncCommunicator::connect(&rover).await.unwrap();

        let updates = futures::stream::iter(vec![RcChannels::neutral(); 3]).boxed();
        let acks: Vec<_> = AsyncCommunicator::stream_rc_channels(&rover, updates)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(acks.len(), 3);
        assert!(acks.iter().all(|ack| ack.as_ref().unwrap().success));
        assert_eq!(rover.rc_frames_received(), 3);
    }

    #[tokio::test]
    async fn test_async_rc_stream_requires_connection() {
        let rover = SimulatedRover::new();
        let updates = futures::stream::iter(vec![RcChannels::neutral()]).boxed();
        let result = AsyncCommunicator::stream_rc_channels(&rover, updates).await;
        assert!(matches!(result, Err(GeodriveError::NotConnected)));
    }

    #[tokio::test]
    async fn test_async_telemetry_feed() {
        let rover = SimulatedRover::new().with_telemetry_period(Duration::from_millis(5));
        AsyncCommunicator::connect(&rover).await.unwrap();

        let samples: Vec<_> = AsyncCommunicator::stream_telemetry(&rover)
            .await
            .unwrap()
            .take(3)
            .collect()
            .await;
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|sample| sample.is_ok()));
    }
}
