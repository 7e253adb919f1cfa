//! # Communicator Module
//!
//! Trait abstraction over the rover transport.
//!
//! Managers and clients only talk to the rover through these traits, so the
//! transport (gRPC, a serial bridge, the in-memory [`sim::SimulatedRover`])
//! stays swappable and testable.
//!
//! Two flavours exist because the RC streaming primitive differs:
//! - [`Communicator`] is blocking and pushes one RC update per call.
//! - [`AsyncCommunicator`] takes a stream of updates once per session and
//!   returns a stream of acknowledgements.
//!
//! Rejected commands come back as `Ok(CommandResult { success: false, .. })`.
//! `Err` is reserved for transport faults.

pub mod sim;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::protocol::{CommandResult, RcAck, RcChannels, RoverCommand, RoverStatus, Telemetry};

/// Blocking telemetry feed. Unbounded; each call to `stream_telemetry` starts a fresh one.
pub type TelemetryIter = Box<dyn Iterator<Item = Result<Telemetry>> + Send>;

/// Async telemetry feed.
pub type TelemetryStream = BoxStream<'static, Result<Telemetry>>;

/// RC updates handed to [`AsyncCommunicator::stream_rc_channels`].
pub type RcUpdateStream = BoxStream<'static, RcChannels>;

/// Per-update acknowledgements returned by [`AsyncCommunicator::stream_rc_channels`].
pub type RcAckStream = BoxStream<'static, Result<RcAck>>;

/// Blocking rover transport.
#[cfg_attr(test, mockall::automock)]
pub trait Communicator: Send + Sync {
    /// Opens the connection. `Ok(false)` means the rover refused or was unreachable.
    fn connect(&self) -> Result<bool>;

    /// Closes the connection.
    fn disconnect(&self) -> Result<()>;

    /// Whether a connection is currently established.
    fn is_connected(&self) -> bool;

    /// Dispatches one command.
    fn send_command(&self, command: &RoverCommand) -> Result<CommandResult>;

    /// Single telemetry snapshot.
    fn get_telemetry(&self) -> Result<Telemetry>;

    /// Continuous telemetry feed.
    fn stream_telemetry(&self) -> Result<TelemetryIter>;

    /// Pushes one RC update and waits for its acknowledgement.
    fn stream_rc_channels(&self, channels: &RcChannels) -> Result<RcAck>;

    /// Battery voltage in volts.
    fn get_battery_voltage(&self) -> Result<f32>;

    /// Rover status report.
    fn get_status(&self) -> Result<RoverStatus>;
}

/// Async rover transport.
#[async_trait]
pub trait AsyncCommunicator: Send + Sync {
    /// Opens the connection. `Ok(false)` means the rover refused or was unreachable.
    async fn connect(&self) -> Result<bool>;

    /// Closes the connection.
    async fn disconnect(&self) -> Result<()>;

    /// Whether a connection is currently established.
    fn is_connected(&self) -> bool;

    /// Dispatches one command.
    async fn send_command(&self, command: &RoverCommand) -> Result<CommandResult>;

    /// Single telemetry snapshot.
    async fn get_telemetry(&self) -> Result<Telemetry>;

    /// Continuous telemetry feed.
    async fn stream_telemetry(&self) -> Result<TelemetryStream>;

    /// Opens an RC streaming session.
    ///
    /// The transport pulls from `updates` and yields one acknowledgement per
    /// update. The ack stream ends once `updates` ends.
    async fn stream_rc_channels(&self, updates: RcUpdateStream) -> Result<RcAckStream>;

    /// Battery voltage in volts.
    async fn get_battery_voltage(&self) -> Result<f32>;

    /// Rover status report.
    async fn get_status(&self) -> Result<RoverStatus>;
}
