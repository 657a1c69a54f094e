//! Termination policy applied in the `Deciding` phase.

use crate::core::snapshot::ChecklistSnapshot;
use crate::core::types::RunMode;

/// Reason why the session loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// Demo mode: one session, then stop.
    DemoComplete,
    /// The next iteration would exceed the configured bound.
    MaxIterationsReached { max_iterations: u32 },
    /// Every checklist record passes.
    ChecklistComplete,
    /// The operator aborted the run.
    Interrupted,
}

/// Stop conditions configured for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    pub run_mode: RunMode,
    pub max_iterations: Option<u32>,
}

/// What to do after a session has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Start another session. `wait` is false when the bound is already
    /// exhausted, so the loop skips the delay and terminates at selection.
    Continue { wait: bool },
    Stop(LoopStop),
}

impl TerminationPolicy {
    /// Decide after session `iteration` using the freshly read snapshot.
    ///
    /// Demo mode stops regardless of checklist state. Stopping skips the
    /// inter-session delay; only `Continue { wait: true }` sleeps.
    pub fn decide(&self, iteration: u32, snapshot: &ChecklistSnapshot) -> Decision {
        match self.run_mode {
            RunMode::Demo => Decision::Stop(LoopStop::DemoComplete),
            RunMode::Production if snapshot.is_complete() => {
                Decision::Stop(LoopStop::ChecklistComplete)
            }
            RunMode::Production => Decision::Continue {
                wait: !self.bound_exhausted(iteration),
            },
        }
    }

    fn bound_exhausted(&self, iteration: u32) -> bool {
        self.max_iterations.is_some_and(|max| iteration >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(passing_count: usize, total_count: usize) -> ChecklistSnapshot {
        ChecklistSnapshot {
            passing_count,
            total_count,
        }
    }

    #[test]
    fn demo_stops_even_when_incomplete() {
        let policy = TerminationPolicy {
            run_mode: RunMode::Demo,
            max_iterations: None,
        };
        assert_eq!(
            policy.decide(1, &snapshot(0, 0)),
            Decision::Stop(LoopStop::DemoComplete)
        );
        assert_eq!(
            policy.decide(1, &snapshot(200, 200)),
            Decision::Stop(LoopStop::DemoComplete)
        );
    }

    #[test]
    fn production_stops_on_complete_checklist() {
        let policy = TerminationPolicy {
            run_mode: RunMode::Production,
            max_iterations: None,
        };
        assert_eq!(
            policy.decide(7, &snapshot(4, 4)),
            Decision::Stop(LoopStop::ChecklistComplete)
        );
        assert_eq!(
            policy.decide(7, &snapshot(3, 4)),
            Decision::Continue { wait: true }
        );
    }

    #[test]
    fn empty_checklist_never_counts_as_complete() {
        let policy = TerminationPolicy {
            run_mode: RunMode::Production,
            max_iterations: None,
        };
        assert_eq!(
            policy.decide(1, &snapshot(0, 0)),
            Decision::Continue { wait: true }
        );
    }

    #[test]
    fn skips_delay_once_bound_is_exhausted() {
        let policy = TerminationPolicy {
            run_mode: RunMode::Production,
            max_iterations: Some(2),
        };
        assert_eq!(
            policy.decide(1, &snapshot(0, 5)),
            Decision::Continue { wait: true }
        );
        assert_eq!(
            policy.decide(2, &snapshot(0, 5)),
            Decision::Continue { wait: false }
        );
    }
}
