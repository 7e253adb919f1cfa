//! # Geodrive Library
//!
//! Control-channel client for GeoDrive rovers.
//!
//! This library provides one-shot motion commands and a fixed-rate RC
//! stream that pushes manual-control setpoints to the rover, in a blocking
//! (worker thread) and an async (tokio task) flavour.

pub mod client;
pub mod communicator;
pub mod config;
pub mod error;
pub mod movement;
pub mod protocol;
pub mod stream;
pub mod telemetry;
