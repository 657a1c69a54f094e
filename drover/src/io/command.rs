//! Invoker that pipes the prompt into an external agent command.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Local;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::core::types::InvocationOutcome;
use crate::io::config::InvokerConfig;
use crate::io::invoker::{AgentInvoker, InvocationError};
use crate::io::process::{CommandOutput, collect_with_timeout, spawn_piped};
use crate::io::prompt::Prompt;

const STDERR_TAIL_CHARS: usize = 500;
const SUMMARY_MAX_CHARS: usize = 200;

/// Runs `command` in the project directory with the prompt on stdin.
///
/// One process per session. Exit status 0 is success; the last non-empty
/// stdout line becomes the session summary.
#[derive(Debug)]
pub struct CommandInvoker {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    log_dir: PathBuf,
    sessions: AtomicU32,
}

impl CommandInvoker {
    pub fn from_config(cfg: &InvokerConfig, workdir: &Path, log_dir: &Path) -> Result<Self> {
        let (program, rest) = cfg
            .command
            .split_first()
            .filter(|(program, _)| !program.trim().is_empty())
            .ok_or_else(|| anyhow!("invoker.command must name a program"))?;
        let mut args = rest.to_vec();
        if let Some(model) = &cfg.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        Ok(Self {
            program: program.clone(),
            args,
            workdir: workdir.to_path_buf(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
            log_dir: log_dir.to_path_buf(),
            sessions: AtomicU32::new(0),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn next_log_path(&self) -> PathBuf {
        let n = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        self.log_dir.join(format!("session-{stamp}-{n}.log"))
    }
}

#[async_trait]
impl AgentInvoker for CommandInvoker {
    #[instrument(skip_all, fields(program = %self.program, mode = %prompt.mode(), timeout_secs = self.timeout.as_secs()))]
    async fn invoke(&self, prompt: &Prompt) -> Result<InvocationOutcome, InvocationError> {
        info!(workdir = %self.workdir.display(), "starting agent command");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.workdir);
        let child = spawn_piped(&mut cmd, true).map_err(|source| InvocationError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let output = collect_with_timeout(
            child,
            Some(prompt.text().as_bytes().to_vec()),
            self.timeout,
            self.output_limit_bytes,
        )
        .await
        .map_err(InvocationError::Process)?;

        let log_path = self.next_log_path();
        if let Err(err) = write_session_log(&log_path, &output, self.output_limit_bytes) {
            warn!(path = %log_path.display(), err = %format!("{err:#}"), "failed to write session log");
        }

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent command timed out");
            return Err(InvocationError::TimedOut(self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent command failed");
            return Err(InvocationError::Failed {
                code: output.status.code(),
                stderr_tail: stderr_tail(&output.stderr),
            });
        }

        debug!("agent command completed successfully");
        Ok(InvocationOutcome {
            summary: last_line(&output.stdout),
        })
    }
}

fn last_line(stdout: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stdout);
    text.lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(SUMMARY_MAX_CHARS).collect())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "no stderr".to_string();
    }
    let count = trimmed.chars().count();
    trimmed.chars().skip(count.saturating_sub(STDERR_TAIL_CHARS)).collect()
}

fn write_session_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create session log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str(&format!("=== exit status: {:?} ===\n", output.status.code()));
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice("agent"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice("agent"));
    if output.timed_out {
        buf.push_str("\n[agent timed out]\n");
    }
    if output.pipes_abandoned {
        buf.push_str("\n[agent left output pipes open]\n");
    }

    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let truncated = format!("{}\n[truncated {} bytes]\n", &buf[..cut], buf.len() - cut);
        return fs::write(path, truncated)
            .with_context(|| format!("write session log {}", path.display()));
    }

    fs::write(path, buf).with_context(|| format!("write session log {}", path.display()))
}
