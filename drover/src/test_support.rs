//! Test helpers: project fixtures, checklist writers and scripted invokers.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::core::policy::LoopStop;
use crate::core::types::{FeatureRecord, InvocationOutcome, Mode};
use crate::io::config::DroverConfig;
use crate::io::invoker::{AgentInvoker, InvocationError};
use crate::io::progress_log::{ProgressEntry, ProgressLog};
use crate::io::prompt::{CODING_PROMPT_FILE, INITIALIZER_PROMPT_FILE, Prompt};
use crate::session::{LoopOutcome, RunStart, SessionConfig, SessionObserver, SessionReport};

/// Write a checklist with `total` records, the first `passing` of which pass.
pub fn write_checklist(path: &Path, passing: usize, total: usize) -> Result<()> {
    let records: Vec<FeatureRecord> = (0..total)
        .map(|idx| FeatureRecord {
            identifier: Some(format!("feature-{idx}")),
            description: Some(format!("feature {idx} works")),
            passes: idx < passing,
        })
        .collect();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(&records)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

/// Temporary project directory laid out with default file names.
pub struct TestProject {
    temp: TempDir,
}

impl TestProject {
    pub const INITIALIZER_TEXT: &'static str = "Create feature_list.json and set up the project.\n";
    pub const CODING_TEXT: &'static str = "Pick the next failing feature and implement it.\n";

    /// Project with both prompt files in place.
    pub fn new() -> Result<Self> {
        let project = Self::without_prompts()?;
        let prompts = project.prompts_dir();
        fs::create_dir_all(&prompts).context("create prompts dir")?;
        fs::write(prompts.join(INITIALIZER_PROMPT_FILE), Self::INITIALIZER_TEXT)
            .context("write initializer prompt")?;
        fs::write(prompts.join(CODING_PROMPT_FILE), Self::CODING_TEXT)
            .context("write coding prompt")?;
        Ok(project)
    }

    pub fn without_prompts() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp project")?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn checklist_path(&self) -> PathBuf {
        self.root().join("feature_list.json")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.root().join("claude-progress.txt")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.root().join("prompts")
    }

    pub fn write_checklist(&self, passing: usize, total: usize) -> Result<()> {
        write_checklist(&self.checklist_path(), passing, total)
    }

    pub fn progress_entries(&self) -> Result<Vec<ProgressEntry>> {
        ProgressLog::new(self.progress_path()).entries()
    }

    /// Default config without the inter-session delay.
    pub fn session_config(&self) -> SessionConfig {
        let cfg = DroverConfig {
            delay_secs: 0,
            ..DroverConfig::default()
        };
        SessionConfig::resolve(self.root(), &cfg)
    }
}

/// One scripted agent session.
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    result: Result<Option<String>, String>,
    checklist: Option<(PathBuf, usize, usize)>,
}

impl ScriptedSession {
    pub fn success(summary: &str) -> Self {
        Self {
            result: Ok(Some(summary.to_string())),
            checklist: None,
        }
    }

    /// Exits non-zero with `stderr` as the captured tail.
    pub fn failure(stderr: &str) -> Self {
        Self {
            result: Err(stderr.to_string()),
            checklist: None,
        }
    }

    /// Rewrite the checklist during the session, as the agent would.
    pub fn with_checklist(mut self, path: &Path, passing: usize, total: usize) -> Self {
        self.checklist = Some((path.to_path_buf(), passing, total));
        self
    }
}

/// Invoker that replays [`ScriptedSession`]s in order.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<ScriptedSession>>,
    fallback: Option<ScriptedSession>,
    seen: Mutex<Vec<Prompt>>,
}

impl ScriptedInvoker {
    pub fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            script: Mutex::new(sessions.into()),
            ..Self::default()
        }
    }

    /// Replays `session` for every invocation.
    pub fn repeating(session: ScriptedSession) -> Self {
        Self {
            fallback: Some(session),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or_default()
    }

    pub fn modes(&self) -> Vec<Mode> {
        self.seen
            .lock()
            .map(|seen| seen.iter().map(Prompt::mode).collect())
            .unwrap_or_default()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.seen
            .lock()
            .map(|seen| seen.iter().map(|p| p.text().to_string()).collect())
            .unwrap_or_default()
    }

    fn next_session(&self) -> Option<ScriptedSession> {
        let next = self.script.lock().ok().and_then(|mut script| script.pop_front());
        next.or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, prompt: &Prompt) -> Result<InvocationOutcome, InvocationError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(prompt.clone());
        }
        let Some(session) = self.next_session() else {
            return Err(InvocationError::Failed {
                code: None,
                stderr_tail: "script exhausted".to_string(),
            });
        };
        if let Some((path, passing, total)) = &session.checklist {
            write_checklist(path, *passing, *total).map_err(InvocationError::Process)?;
        }
        match session.result {
            Ok(summary) => Ok(InvocationOutcome { summary }),
            Err(stderr_tail) => Err(InvocationError::Failed {
                code: Some(1),
                stderr_tail,
            }),
        }
    }
}

/// Invoker whose every session fails the same way.
#[derive(Debug)]
pub struct FailingInvoker {
    reason: String,
    calls: AtomicUsize,
}

impl FailingInvoker {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentInvoker for FailingInvoker {
    async fn invoke(&self, _prompt: &Prompt) -> Result<InvocationOutcome, InvocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(InvocationError::Failed {
            code: Some(1),
            stderr_tail: self.reason.clone(),
        })
    }
}

/// Invoker that never finishes, for cancellation tests.
#[derive(Debug, Default)]
pub struct PendingInvoker {
    started: Notify,
}

impl PendingInvoker {
    /// Resolves once an invocation is in flight.
    pub async fn started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl AgentInvoker for PendingInvoker {
    async fn invoke(&self, _prompt: &Prompt) -> Result<InvocationOutcome, InvocationError> {
        self.started.notify_one();
        std::future::pending().await
    }
}

/// Observer events in the order they fired.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Start(Mode),
    SessionStart(u32, Mode),
    SessionEnd(u32),
    Waiting(Duration),
    Stop(LoopStop),
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub start: Option<RunStart>,
    pub reports: Vec<SessionReport>,
    pub events: Vec<Observed>,
    pub outcome: Option<LoopOutcome>,
    cancel_on_wait: Option<CancellationToken>,
}

impl RecordingObserver {
    /// Cancels `token` as soon as the loop starts waiting between sessions.
    pub fn cancelling_on_wait(token: CancellationToken) -> Self {
        Self {
            cancel_on_wait: Some(token),
            ..Self::default()
        }
    }
}

impl SessionObserver for RecordingObserver {
    fn on_start(&mut self, start: &RunStart) {
        self.events.push(Observed::Start(start.mode));
        self.start = Some(start.clone());
    }

    fn on_session_start(&mut self, iteration: u32, mode: Mode) {
        self.events.push(Observed::SessionStart(iteration, mode));
    }

    fn on_session_end(&mut self, report: &SessionReport) {
        self.events.push(Observed::SessionEnd(report.iteration));
        self.reports.push(report.clone());
    }

    fn on_waiting(&mut self, delay: Duration) {
        self.events.push(Observed::Waiting(delay));
        if let Some(token) = &self.cancel_on_wait {
            token.cancel();
        }
    }

    fn on_stop(&mut self, outcome: &LoopOutcome) {
        self.events.push(Observed::Stop(outcome.stop));
        self.outcome = Some(outcome.clone());
    }
}
