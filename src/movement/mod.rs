//! # Movement Module
//!
//! Discrete motion commands and the RC stream, in two concurrency flavours.
//!
//! | Manager | Communicator | RC loop | Stop waits |
//! |---------|--------------|---------|------------|
//! | [`MovementManager`] | [`Communicator`](crate::communicator::Communicator) | OS thread | up to `stop_timeout` |
//! | [`AsyncMovementManager`] | [`AsyncCommunicator`](crate::communicator::AsyncCommunicator) | tokio task | until the task exits |
//!
//! Both reset every RC channel to neutral on each stop, whichever way the
//! loop ends. They also differ in how a loop-ending fault surfaces: the
//! async manager returns it from `stop_rc_stream`, the thread manager only
//! logs it.

pub mod blocking;
pub mod cooperative;

pub use blocking::MovementManager;
pub use cooperative::AsyncMovementManager;

/// Result of stopping the thread-based RC stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No stream was active
    NotRunning,
    /// The loop exited and was joined
    Stopped,
    /// The loop did not exit within the stop timeout and was abandoned
    TimedOut,
}
