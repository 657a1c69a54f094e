//! Session state machine.
//!
//! ```text
//! Idle -> SelectingMode -> Invoking -> Reporting -> Deciding -> SelectingMode ...
//!              |                                        |
//!              +------------> Terminated <--------------+
//! ```
//!
//! The state is recomputed from the checklist at every process start, so a
//! killed and restarted loop converges to the same mode decision.

use crate::core::types::Mode;

/// Where the loop currently is within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SelectingMode,
    Invoking,
    Reporting,
    Deciding,
    Terminated,
}

/// Result of entering `SelectingMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Run session `iteration` in `mode`.
    Run { iteration: u32, mode: Mode },
    /// `iteration` went past the configured bound; the loop must stop.
    BoundReached { max_iterations: u32 },
}

/// Per-run loop state. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    iteration: u32,
    mode: Mode,
    is_first_run: bool,
    phase: Phase,
}

impl SessionState {
    pub fn new(checklist_populated: bool) -> Self {
        let mode = Mode::initial(checklist_populated);
        Self {
            iteration: 0,
            mode,
            is_first_run: mode == Mode::Bootstrap,
            phase: Phase::Idle,
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether this run started without a checklist.
    pub fn is_first_run(&self) -> bool {
        self.is_first_run
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Enter `SelectingMode`: bump the counter and check it against the bound.
    ///
    /// The loop terminates exactly when `iteration > max_iterations`.
    pub fn begin_iteration(&mut self, max_iterations: Option<u32>) -> Selection {
        self.phase = Phase::SelectingMode;
        self.iteration += 1;
        if let Some(max_iterations) = max_iterations
            && self.iteration > max_iterations
        {
            self.phase = Phase::Terminated;
            return Selection::BoundReached { max_iterations };
        }
        self.phase = Phase::Invoking;
        Selection::Run {
            iteration: self.iteration,
            mode: self.mode,
        }
    }

    pub fn begin_reporting(&mut self) {
        self.phase = Phase::Reporting;
    }

    /// Close out a session and commit the mode.
    ///
    /// A bootstrap session flips the run to `Incremental` for good, whatever
    /// the invocation outcome was. Returns true when the flip happened.
    pub fn finish_session(&mut self) -> bool {
        self.phase = Phase::Deciding;
        match self.mode {
            Mode::Bootstrap => {
                self.mode = Mode::Incremental;
                true
            }
            Mode::Incremental => false,
        }
    }

    pub fn terminate(&mut self) {
        self.phase = Phase::Terminated;
    }
}
