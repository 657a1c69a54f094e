//! Agent invocation boundary.
//!
//! The [`AgentInvoker`] trait decouples the session loop from the actual agent
//! backend. The loop only distinguishes success from failure and never
//! retries; retry policy belongs to invokers such as [`RetryingInvoker`].
//! Tests use scripted invokers that return predetermined outcomes without
//! spawning processes.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::InvocationOutcome;
use crate::io::command::CommandInvoker;
use crate::io::config::{InvokerConfig, InvokerKind};
use crate::io::prompt::Prompt;

/// Why an agent session did not complete.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("spawn {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("agent process: {0:#}")]
    Process(anyhow::Error),
    #[error("agent exited with status {code:?}: {stderr_tail}")]
    Failed {
        code: Option<i32>,
        stderr_tail: String,
    },
    #[error("agent timed out after {0:?}")]
    TimedOut(Duration),
}

/// Abstraction over agent execution backends.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Hand `prompt` to the agent and wait for the session to end.
    ///
    /// May suspend for as long as the agent runs. Dropping the future must
    /// abandon the session.
    async fn invoke(&self, prompt: &Prompt) -> Result<InvocationOutcome, InvocationError>;
}

#[async_trait]
impl<T: AgentInvoker + ?Sized> AgentInvoker for Box<T> {
    async fn invoke(&self, prompt: &Prompt) -> Result<InvocationOutcome, InvocationError> {
        (**self).invoke(prompt).await
    }
}

#[async_trait]
impl<T: AgentInvoker + ?Sized> AgentInvoker for &T {
    async fn invoke(&self, prompt: &Prompt) -> Result<InvocationOutcome, InvocationError> {
        (**self).invoke(prompt).await
    }
}

const RULE: &str = "----------------------------------------------------------------------";

/// Placeholder invoker: shows the prompt and how to run the agent by hand.
#[derive(Debug, Clone)]
pub struct StubInvoker {
    preview_chars: usize,
}

impl Default for StubInvoker {
    fn default() -> Self {
        Self { preview_chars: 500 }
    }
}

impl StubInvoker {
    pub fn new(preview_chars: usize) -> Self {
        Self { preview_chars }
    }

    fn render(&self, prompt: &Prompt) -> String {
        let lines = [
            String::new(),
            RULE.to_string(),
            format!("PROMPT TO SEND TO THE AGENT ({}):", prompt.mode()),
            RULE.to_string(),
            String::new(),
            prompt.preview(self.preview_chars),
            String::new(),
            RULE.to_string(),
            "To run the agent for real, either:".to_string(),
            "  1. set `invoker.kind = \"command\"` in drover.toml (or pass --invoker command)"
                .to_string(),
            "     so each prompt is piped into the configured agent command, or".to_string(),
            format!(
                "  2. paste {} into an interactive agent session.",
                prompt.source().display()
            ),
            String::new(),
            "The agent is expected to update the feature checklist and the progress log."
                .to_string(),
        ];
        lines.join("\n")
    }
}

#[async_trait]
impl AgentInvoker for StubInvoker {
    async fn invoke(&self, prompt: &Prompt) -> Result<InvocationOutcome, InvocationError> {
        debug!(mode = %prompt.mode(), "stub invoker showing prompt");
        println!("{}", self.render(prompt));
        Ok(InvocationOutcome::default())
    }
}

/// Retries a failing invoker with a fixed pause between attempts.
#[derive(Debug, Clone)]
pub struct RetryingInvoker<I> {
    inner: I,
    retries: u32,
    backoff: Duration,
}

impl<I> RetryingInvoker<I> {
    pub fn new(inner: I, retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            retries,
            backoff,
        }
    }
}

#[async_trait]
impl<I: AgentInvoker> AgentInvoker for RetryingInvoker<I> {
    #[instrument(skip_all, fields(retries = self.retries, mode = %prompt.mode()))]
    async fn invoke(&self, prompt: &Prompt) -> Result<InvocationOutcome, InvocationError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.invoke(prompt).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if attempt < self.retries => {
                    attempt += 1;
                    warn!(attempt, err = %err, backoff_secs = self.backoff.as_secs(), "agent invocation failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Build the invoker selected by `cfg`.
///
/// `workdir` is where the agent runs; `log_dir` receives per-session logs.
pub fn build_invoker(
    cfg: &InvokerConfig,
    workdir: &Path,
    log_dir: &Path,
) -> Result<Box<dyn AgentInvoker>> {
    let base: Box<dyn AgentInvoker> = match cfg.kind {
        InvokerKind::Stub => Box::new(StubInvoker::default()),
        InvokerKind::Command => Box::new(CommandInvoker::from_config(cfg, workdir, log_dir)?),
    };
    info!(kind = ?cfg.kind, retries = cfg.retries, "agent invoker ready");
    if cfg.retries == 0 {
        return Ok(base);
    }
    Ok(Box::new(RetryingInvoker::new(
        base,
        cfg.retries,
        Duration::from_secs(cfg.retry_backoff_secs),
    )))
}
