//! # Protocol Module
//!
//! Data exchanged with the rover, independent of the transport.
//!
//! This module handles:
//! - RC channel setpoints (8 channels, 1000-2000, neutral 1500)
//! - One-shot commands and their results
//! - Streaming acknowledgements
//! - Telemetry and status snapshots

pub mod channels;
pub mod command;
pub mod telemetry;

pub use channels::{Channel, RcChannels, RcChannelsHandle};
pub use command::{CommandResult, RcAck, RoverCommand};
pub use telemetry::{RoverStatus, Telemetry};
