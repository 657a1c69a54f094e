//! Session loop: drives the agent until the checklist passes or a stop
//! condition fires.
//!
//! Each pass selects the mode, hands the matching prompt to the invoker,
//! re-reads the checklist, appends a progress entry and applies the
//! termination policy. The pure transitions live in [`crate::core`]; this
//! module only sequences them with I/O.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::machine::{Selection, SessionState};
use crate::core::policy::{Decision, LoopStop, TerminationPolicy};
use crate::core::snapshot::ChecklistSnapshot;
use crate::core::types::{Mode, RunMode};
use crate::io::checklist::ChecklistStore;
use crate::io::config::DroverConfig;
use crate::io::invoker::AgentInvoker;
use crate::io::progress_log::ProgressLog;
use crate::io::prompt::{PromptContext, PromptProvider};

/// Fully resolved settings for one run. Paths are absolute or relative to
/// the current directory, never to the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub project_dir: PathBuf,
    pub checklist_path: PathBuf,
    pub progress_path: PathBuf,
    pub prompts_dir: PathBuf,
    pub state_dir: PathBuf,
    pub max_iterations: Option<u32>,
    pub delay: Duration,
    pub run_mode: RunMode,
    pub render_templates: bool,
}

impl SessionConfig {
    /// Resolve `cfg` against `project_dir`.
    pub fn resolve(project_dir: &Path, cfg: &DroverConfig) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            checklist_path: project_dir.join(&cfg.checklist_file),
            progress_path: project_dir.join(&cfg.progress_file),
            prompts_dir: project_dir.join(&cfg.prompts_dir),
            state_dir: project_dir.join(&cfg.state_dir),
            max_iterations: cfg.max_iterations,
            delay: Duration::from_secs(cfg.delay_secs),
            run_mode: cfg.run_mode,
            render_templates: cfg.render_templates,
        }
    }

    pub fn policy(&self) -> TerminationPolicy {
        TerminationPolicy {
            run_mode: self.run_mode,
            max_iterations: self.max_iterations,
        }
    }

    /// Where invokers keep per-session logs.
    pub fn sessions_log_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }
}

/// How a single session ended, as recorded in the progress log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { summary: Option<String> },
    Failed { reason: String },
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Completed { .. })
    }
}

/// Everything known about a session once it has been reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub iteration: u32,
    pub mode: Mode,
    pub outcome: SessionOutcome,
    /// Checklist state read right after the invocation.
    pub snapshot: ChecklistSnapshot,
    /// False when the progress entry could not be written.
    pub logged: bool,
}

/// State observed when the loop starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStart {
    pub project_dir: PathBuf,
    pub mode: Mode,
    pub is_first_run: bool,
    pub snapshot: ChecklistSnapshot,
    pub run_mode: RunMode,
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    /// Sessions that reached the reporting phase.
    pub iterations_executed: u32,
    pub stop: LoopStop,
    pub final_snapshot: ChecklistSnapshot,
    pub final_mode: Mode,
}

/// Hooks for presenting loop progress. All methods default to no-ops.
pub trait SessionObserver {
    fn on_start(&mut self, _start: &RunStart) {}
    fn on_session_start(&mut self, _iteration: u32, _mode: Mode) {}
    fn on_session_end(&mut self, _report: &SessionReport) {}
    /// Called before the inter-session delay begins.
    fn on_waiting(&mut self, _delay: Duration) {}
    fn on_stop(&mut self, _outcome: &LoopOutcome) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Body of the progress entry for `report`.
pub fn render_session_entry(report: &SessionReport) -> String {
    let mut buf = format!(
        "Session {} ({} agent)\n\n",
        report.iteration,
        report.mode.agent_label()
    );
    match &report.outcome {
        SessionOutcome::Completed { summary } => {
            buf.push_str("Outcome: completed\n");
            if let Some(summary) = summary {
                buf.push_str(&format!("Summary: {summary}\n"));
            }
        }
        SessionOutcome::Failed { reason } => {
            buf.push_str(&format!("Outcome: failed: {reason}\n"));
        }
    }
    buf.push_str(&format!("Progress: {}\n", report.snapshot.progress_line()));
    buf
}

pub struct SessionLoop<I> {
    config: SessionConfig,
    invoker: I,
    cancel: CancellationToken,
}

impl<I: AgentInvoker> SessionLoop<I> {
    pub fn new(config: SessionConfig, invoker: I) -> Self {
        Self {
            config,
            invoker,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one cancelled on Ctrl-C.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run sessions until the termination policy, the iteration bound or a
    /// cancellation stops the loop.
    ///
    /// Only a prompt that cannot be resolved aborts with an error; invocation
    /// and progress-log failures are recorded and the loop carries on.
    #[instrument(skip_all, fields(project_dir = %self.config.project_dir.display(), run_mode = %self.config.run_mode))]
    pub async fn run<O: SessionObserver>(&self, observer: &mut O) -> Result<LoopOutcome> {
        let checklist = ChecklistStore::new(&self.config.checklist_path);
        let progress = ProgressLog::new(&self.config.progress_path);
        let prompts = PromptProvider::new(&self.config.prompts_dir)
            .with_templates(self.config.render_templates);
        let policy = self.config.policy();

        let initial = checklist.snapshot();
        let mut state = SessionState::new(initial.is_initialized());
        let start = RunStart {
            project_dir: self.config.project_dir.clone(),
            mode: state.mode(),
            is_first_run: state.is_first_run(),
            snapshot: initial,
            run_mode: self.config.run_mode,
            max_iterations: self.config.max_iterations,
        };
        info!(mode = %start.mode, passing = initial.passing_count, total = initial.total_count, "session loop starting");
        observer.on_start(&start);

        let mut executed = 0u32;
        let mut last_snapshot = initial;
        let stop = loop {
            if self.cancel.is_cancelled() {
                break LoopStop::Interrupted;
            }
            let (iteration, mode) = match state.begin_iteration(policy.max_iterations) {
                Selection::Run { iteration, mode } => (iteration, mode),
                Selection::BoundReached { max_iterations } => {
                    info!(max_iterations, "iteration bound reached");
                    break LoopStop::MaxIterationsReached { max_iterations };
                }
            };
            observer.on_session_start(iteration, mode);

            let ctx = PromptContext {
                iteration,
                snapshot: last_snapshot,
                project_dir: self.config.project_dir.clone(),
            };
            let prompt = prompts
                .resolve_for(mode, &ctx)
                .with_context(|| format!("session {iteration}: resolve {mode} prompt"))?;

            info!(iteration, %mode, "invoking agent");
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.invoker.invoke(&prompt) => Some(result),
            };
            let Some(result) = result else {
                warn!(iteration, "interrupted during agent session");
                break LoopStop::Interrupted;
            };

            state.begin_reporting();
            let outcome = match result {
                Ok(outcome) => SessionOutcome::Completed {
                    summary: outcome.summary,
                },
                Err(err) => {
                    warn!(iteration, err = %err, "agent session failed");
                    SessionOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            let snapshot = checklist.snapshot();
            executed += 1;
            let mut report = SessionReport {
                iteration,
                mode,
                outcome,
                snapshot,
                logged: false,
            };
            match progress.append(&render_session_entry(&report)) {
                Ok(_) => report.logged = true,
                Err(err) => {
                    warn!(path = %progress.path().display(), err = %format!("{err:#}"), "failed to append progress entry");
                }
            }
            observer.on_session_end(&report);
            last_snapshot = snapshot;

            if state.finish_session() {
                info!("bootstrap finished, switching to incremental sessions");
            }

            match policy.decide(iteration, &snapshot) {
                // A stop never sits out the delay first, in demo mode included.
                Decision::Stop(stop) => break stop,
                Decision::Continue { wait: false } => continue,
                Decision::Continue { wait: true } => {
                    observer.on_waiting(self.config.delay);
                    let interrupted = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => true,
                        _ = tokio::time::sleep(self.config.delay) => false,
                    };
                    if interrupted {
                        break LoopStop::Interrupted;
                    }
                }
            }
        };
        state.terminate();

        let outcome = LoopOutcome {
            iterations_executed: executed,
            stop,
            final_snapshot: checklist.snapshot(),
            final_mode: state.mode(),
        };
        info!(
            stop = ?outcome.stop,
            iterations = outcome.iterations_executed,
            progress = %outcome.final_snapshot.progress_line(),
            "session loop finished"
        );
        observer.on_stop(&outcome);
        Ok(outcome)
    }
}
