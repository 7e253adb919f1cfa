//! # Streaming Session State Machine
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Idle
//! ```
//!
//! [`Session`] owns the handle of the running loop and is shared by both
//! managers; they differ only in how a loop is spawned and joined. Callers
//! keep the session behind a mutex and serialize whole start/stop
//! transitions with a second lock, so a start issued during a stop waits
//! for the stop to finish instead of spawning a second loop.

/// Lifecycle of an RC streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// A spawned loop that can be told to stop.
pub trait LoopHandle {
    /// Asks the loop to exit at its next iteration boundary.
    fn signal_stop(&self);

    /// Whether the loop has already exited.
    fn is_finished(&self) -> bool;
}

/// Outcome of [`Session::begin_start`].
#[derive(Debug)]
pub enum StartDecision<H> {
    /// A live loop exists; nothing to do.
    AlreadyRunning,
    /// Go ahead and spawn. Carries a loop that already exited on its own,
    /// if any, so the caller can reap it.
    Spawn(Option<H>),
}

/// Session state plus the handle of the current loop.
#[derive(Debug)]
pub struct Session<H> {
    state: SessionState,
    active: Option<H>,
    started: u64,
}

impl<H> Default for Session<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Session<H> {
    /// An idle session.
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            active: None,
            started: 0,
        }
    }

    /// Number of loops spawned over the session's lifetime.
    pub fn sessions_started(&self) -> u64 {
        self.started
    }

    /// Running -> Stopping -> Idle bookkeeping once the loop is gone.
    pub fn finish_stop(&mut self) {
        self.state = SessionState::Idle;
    }

    /// Idle again after a failed spawn.
    pub fn abort_start(&mut self) {
        self.state = SessionState::Idle;
    }

    /// Starting -> Running with the freshly spawned loop.
    pub fn finish_start(&mut self, handle: H) {
        self.active = Some(handle);
        self.started += 1;
        self.state = SessionState::Running;
    }
}

impl<H: LoopHandle> Session<H> {
    /// Current state. A loop that exited on its own reads as Idle.
    pub fn state(&self) -> SessionState {
        match self.state {
            SessionState::Running if !self.loop_alive() => SessionState::Idle,
            state => state,
        }
    }

    /// True while a loop is live.
    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    fn loop_alive(&self) -> bool {
        self.active.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Idle -> Starting, unless a live loop already exists.
    pub fn begin_start(&mut self) -> StartDecision<H> {
        if self.is_running() {
            return StartDecision::AlreadyRunning;
        }
        self.state = SessionState::Starting;
        StartDecision::Spawn(self.active.take())
    }

    /// Running -> Stopping. Signals the loop and hands its handle to the
    /// caller for joining; `None` when there is nothing to stop.
    pub fn begin_stop(&mut self) -> Option<H> {
        match self.active.take() {
            Some(handle) => {
                self.state = SessionState::Stopping;
                handle.signal_stop();
                Some(handle)
            }
            None => {
                self.state = SessionState::Idle;
                None
            }
        }
    }
}
