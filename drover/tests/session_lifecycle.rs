//! Loop-level harness tests for full session lifecycles.
//!
//! These tests drive `SessionLoop::run` through several sessions against a
//! temporary project to verify end-to-end behavior: mode selection, progress
//! journaling, bound enforcement and completion.

use std::fs;
use std::time::Duration;

use drover::core::policy::LoopStop;
use drover::core::snapshot::ChecklistSnapshot;
use drover::core::types::{Mode, RunMode};
use drover::session::{SessionConfig, SessionLoop};
use drover::test_support::{
    FailingInvoker, Observed, RecordingObserver, ScriptedInvoker, ScriptedSession, TestProject,
};

fn production(project: &TestProject, max_iterations: Option<u32>) -> SessionConfig {
    SessionConfig {
        max_iterations,
        run_mode: RunMode::Production,
        delay: Duration::ZERO,
        ..project.session_config()
    }
}

/// Full lifecycle: bootstrap creates the checklist, coding sessions finish it.
///
/// Sequence:
/// 1. Session 1 (initializer): writes 4 features, none passing.
/// 2. Session 2 (coding): fails, checklist untouched.
/// 3. Session 3 (coding): 3/4 passing.
/// 4. Session 4 (coding): 4/4 passing, loop stops with `ChecklistComplete`.
#[tokio::test]
async fn full_lifecycle_bootstraps_then_completes_checklist() {
    let project = TestProject::new().expect("project");
    let checklist = project.checklist_path();
    let invoker = ScriptedInvoker::new(vec![
        ScriptedSession::success("generated checklist").with_checklist(&checklist, 0, 4),
        ScriptedSession::failure("tool crashed"),
        ScriptedSession::success("three features").with_checklist(&checklist, 3, 4),
        ScriptedSession::success("last feature").with_checklist(&checklist, 4, 4),
    ]);

    let mut observer = RecordingObserver::default();
    let outcome = SessionLoop::new(production(&project, Some(10)), &invoker)
        .run(&mut observer)
        .await
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::ChecklistComplete);
    assert_eq!(outcome.iterations_executed, 4);
    assert_eq!(outcome.final_mode, Mode::Incremental);
    assert_eq!(
        outcome.final_snapshot,
        ChecklistSnapshot {
            passing_count: 4,
            total_count: 4
        }
    );
    assert_eq!(
        invoker.modes(),
        vec![
            Mode::Bootstrap,
            Mode::Incremental,
            Mode::Incremental,
            Mode::Incremental
        ]
    );
    assert_eq!(
        invoker.prompts(),
        vec![
            TestProject::INITIALIZER_TEXT,
            TestProject::CODING_TEXT,
            TestProject::CODING_TEXT,
            TestProject::CODING_TEXT
        ]
    );

    let entries = project.progress_entries().expect("entries");
    let bodies: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(
        bodies,
        vec![
            "Session 1 (initializer agent)\n\nOutcome: completed\nSummary: generated checklist\nProgress: 0/4 tests passing (0.0%)\n",
            "Session 2 (coding agent)\n\nOutcome: failed: agent exited with status Some(1): tool crashed\nProgress: 0/4 tests passing (0.0%)\n",
            "Session 3 (coding agent)\n\nOutcome: completed\nSummary: three features\nProgress: 3/4 tests passing (75.0%)\n",
            "Session 4 (coding agent)\n\nOutcome: completed\nSummary: last feature\nProgress: 4/4 tests passing (100.0%)\n",
        ]
    );

    assert_eq!(observer.events.first(), Some(&Observed::Start(Mode::Bootstrap)));
    assert_eq!(
        observer.events.last(),
        Some(&Observed::Stop(LoopStop::ChecklistComplete))
    );
}

/// Bound 3 with an agent that always fails: exactly 3 sessions, 3 entries.
#[tokio::test]
async fn always_failing_agent_stops_at_bound() {
    let project = TestProject::new().expect("project");
    let invoker = FailingInvoker::new("exit 1");

    let outcome = SessionLoop::new(production(&project, Some(3)), &invoker)
        .run(&mut RecordingObserver::default())
        .await
        .expect("run");

    assert_eq!(
        outcome.stop,
        LoopStop::MaxIterationsReached { max_iterations: 3 }
    );
    assert_eq!(invoker.calls(), 3);
    let entries = project.progress_entries().expect("entries");
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.content.contains("Outcome: failed")));
    assert!(entries[0].content.contains("(initializer agent)"));
    assert!(entries[1].content.contains("(coding agent)"));
    assert!(entries[2].content.contains("feature checklist not yet created"));
}

/// A restarted loop recomputes its mode from disk and only appends.
#[tokio::test]
async fn restart_resumes_in_incremental_and_keeps_history() {
    let project = TestProject::new().expect("project");
    let checklist = project.checklist_path();

    let first = ScriptedInvoker::new(vec![
        ScriptedSession::success("setup").with_checklist(&checklist, 0, 200),
    ]);
    SessionLoop::new(project.session_config(), &first)
        .run(&mut RecordingObserver::default())
        .await
        .expect("first run");
    let after_first = fs::read_to_string(project.progress_path()).expect("read");

    let second = ScriptedInvoker::new(vec![
        ScriptedSession::success("feature").with_checklist(&checklist, 50, 200),
    ]);
    let mut observer = RecordingObserver::default();
    let outcome = SessionLoop::new(project.session_config(), &second)
        .run(&mut observer)
        .await
        .expect("second run");

    assert_eq!(first.modes(), vec![Mode::Bootstrap]);
    assert_eq!(second.modes(), vec![Mode::Incremental]);
    assert_eq!(outcome.stop, LoopStop::DemoComplete);
    assert_eq!(outcome.final_snapshot.percentage(), Some(25.0));

    let start = observer.start.expect("start");
    assert!(!start.is_first_run);
    assert_eq!(start.snapshot.total_count, 200);

    let after_second = fs::read_to_string(project.progress_path()).expect("read");
    assert!(after_second.starts_with(&after_first));
    let entries = project.progress_entries().expect("entries");
    assert_eq!(entries.len(), 2);
    // Each run numbers its sessions from 1.
    assert!(entries[1].content.starts_with("Session 1 (coding agent)"));
}
