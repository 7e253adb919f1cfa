//! # Rover Commands
//!
//! One-shot commands and their outcomes.
//!
//! A [`RoverCommand`] is a logical operation plus its named parameters. The
//! transport decides how to put it on the wire; [`RoverCommand::kind`] and
//! [`RoverCommand::params`] give it a flat view to work from.

use serde::{Deserialize, Serialize};

/// One-shot command sent to the rover.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RoverCommand {
    /// Linear (m/s) and angular (rad/s) velocity
    SetVelocity { linear: f64, angular: f64 },
    /// Left and right track speeds
    SetDifferentialSpeed { left: f64, right: f64 },
    /// Controlled stop
    Stop,
    /// Immediate stop, bypassing any ramp-down
    EmergencyStop,
    /// Navigate to a point; path execution is up to the rover
    Goto { x: f64, y: f64, yaw: f64 },
    /// Abort the active goto
    GotoCancel,
    /// Sound the beeper
    Beep,
    /// Play the "moo" sound
    Moo,
}

impl RoverCommand {
    /// Logical operation name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetVelocity { .. } => "set_velocity",
            Self::SetDifferentialSpeed { .. } => "set_diff_speed",
            Self::Stop => "stop",
            Self::EmergencyStop => "emergency_stop",
            Self::Goto { .. } => "goto",
            Self::GotoCancel => "goto_cancel",
            Self::Beep => "beep",
            Self::Moo => "moo",
        }
    }

    /// Named parameters in declaration order.
    #[must_use]
    pub fn params(&self) -> Vec<(&'static str, f64)> {
        match *self {
            Self::SetVelocity { linear, angular } => vec![("linear", linear), ("angular", angular)],
            Self::SetDifferentialSpeed { left, right } => vec![("left", left), ("right", right)],
            Self::Goto { x, y, yaw } => vec![("x", x), ("y", y), ("yaw", yaw)],
            Self::Stop | Self::EmergencyStop | Self::GotoCancel | Self::Beep | Self::Moo => {
                Vec::new()
            }
        }
    }
}

/// Outcome of a one-shot command.
///
/// `success == false` should come with a `message` or `error_code`; the type
/// does not enforce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CommandResult {
    /// Successful result with a message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error_code: None,
        }
    }

    /// Rejected command.
    pub fn failed(message: impl Into<String>, error_code: Option<&str>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            error_code: error_code.map(str::to_string),
        }
    }
}

/// Acknowledgement for one streamed RC update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RcAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RcAck {
    /// Accepted update.
    #[must_use]
    pub fn accepted() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    /// Rejected update.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity_params() {
        let cmd = RoverCommand::SetVelocity {
            linear: 1.0,
            angular: 0.0,
        };
        assert_eq!(cmd.kind(), "set_velocity");
        assert_eq!(cmd.params(), vec![("linear", 1.0), ("angular", 0.0)]);
    }

    #[test]
    fn test_parameterless_commands() {
        for cmd in [
            RoverCommand::Stop,
            RoverCommand::EmergencyStop,
            RoverCommand::GotoCancel,
            RoverCommand::Beep,
            RoverCommand::Moo,
        ] {
            assert!(cmd.params().is_empty(), "{} should carry no params", cmd.kind());
        }
    }

    #[test]
    fn test_command_serializes_tagged() {
        let json = serde_json::to_string(&RoverCommand::Goto {
            x: 1.5,
            y: -2.0,
            yaw: 0.25,
        })
        .unwrap();
        assert_eq!(json, r#"{"command":"goto","x":1.5,"y":-2.0,"yaw":0.25}"#);
    }

    #[test]
    fn test_command_result_constructors() {
        let ok = CommandResult::ok("done");
        assert!(ok.success);
        assert_eq!(ok.message.as_deref(), Some("done"));
        assert!(ok.error_code.is_none());

        let failed = CommandResult::failed("busy", Some("E_BUSY"));
        assert!(!failed.success);
        assert_eq!(failed.error_code.as_deref(), Some("E_BUSY"));
    }

    #[test]
    fn test_command_result_from_json_without_optionals() {
        let result: CommandResult = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(
            result,
            CommandResult {
                success: true,
                message: None,
                error_code: None
            }
        );
    }

    #[test]
    fn test_rc_ack_constructors() {
        assert!(RcAck::accepted().success);
        let rejected = RcAck::rejected("armed check failed");
        assert!(!rejected.success);
        assert_eq!(rejected.message.as_deref(), Some("armed check failed"));
    }
}
