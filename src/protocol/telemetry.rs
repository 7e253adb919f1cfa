//! # Telemetry Types
//!
//! Snapshots reported by the rover. The client only relays them.

use serde::{Deserialize, Serialize};

/// Pose and velocity snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Telemetry {
    /// x, y, z in meters
    pub position: [f64; 3],
    /// vx, vy, vz in m/s
    pub velocity: [f64; 3],
    /// roll, pitch, yaw in radians
    pub attitude: [f64; 3],
}

/// Rover status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoverStatus {
    pub is_connected: bool,
    pub mode: String,
    pub state: String,
    pub uptime_s: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    pub firmware_version: String,
}
