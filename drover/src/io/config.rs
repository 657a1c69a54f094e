//! Loop configuration stored in `drover.toml` at the project root.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::RunMode;

/// Default config file name, looked up in the project directory.
pub const CONFIG_FILE_NAME: &str = "drover.toml";

/// Loop configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to the
/// values the loop has always used; relative paths resolve against the
/// project directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DroverConfig {
    /// Feature checklist maintained by the agent.
    pub checklist_file: PathBuf,

    /// Append-only session journal.
    pub progress_file: PathBuf,

    /// Directory holding `initializer_prompt.md` and `coding_prompt.md`.
    pub prompts_dir: PathBuf,

    /// Loop-owned scratch space (invocation logs).
    pub state_dir: PathBuf,

    /// Upper bound on sessions per run. Unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,

    /// Pause between sessions, in seconds.
    pub delay_secs: u64,

    pub run_mode: RunMode,

    /// Render prompt files as minijinja templates.
    pub render_templates: bool,

    pub invoker: InvokerConfig,
}

/// Which agent invoker backs the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokerKind {
    /// Print the prompt and manual instructions instead of running an agent.
    #[default]
    Stub,
    /// Spawn `command` with the prompt on stdin.
    Command,
}

impl FromStr for InvokerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(InvokerKind::Stub),
            "command" => Ok(InvokerKind::Command),
            other => Err(format!(
                "unknown invoker '{other}' (expected 'stub' or 'command')"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InvokerConfig {
    pub kind: InvokerKind,

    /// Agent command line (e.g. `["claude","--print"]`). The prompt is written to stdin.
    pub command: Vec<String>,

    /// Passed as `--model <model>` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Wall-clock budget for one session, in seconds.
    pub timeout_secs: u64,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Extra attempts after a failed invocation.
    pub retries: u32,

    /// Pause between attempts, in seconds.
    pub retry_backoff_secs: u64,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            kind: InvokerKind::Stub,
            command: vec!["claude".to_string(), "--print".to_string()],
            model: None,
            timeout_secs: 60 * 60,
            output_limit_bytes: 1_000_000,
            retries: 0,
            retry_backoff_secs: 10,
        }
    }
}

impl Default for DroverConfig {
    fn default() -> Self {
        Self {
            checklist_file: PathBuf::from("feature_list.json"),
            progress_file: PathBuf::from("claude-progress.txt"),
            prompts_dir: PathBuf::from("prompts"),
            state_dir: PathBuf::from(".drover"),
            max_iterations: None,
            delay_secs: 3,
            run_mode: RunMode::Demo,
            render_templates: false,
            invoker: InvokerConfig::default(),
        }
    }
}

impl DroverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == Some(0) {
            return Err(anyhow!("max_iterations must be > 0 when set"));
        }
        if self.invoker.timeout_secs == 0 {
            return Err(anyhow!("invoker.timeout_secs must be > 0"));
        }
        if self.invoker.output_limit_bytes == 0 {
            return Err(anyhow!("invoker.output_limit_bytes must be > 0"));
        }
        if self.invoker.kind == InvokerKind::Command
            && (self.invoker.command.is_empty() || self.invoker.command[0].trim().is_empty())
        {
            return Err(anyhow!("invoker.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Values supplied on the command line, applied over the file config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub max_iterations: Option<u32>,
    pub delay_secs: Option<u64>,
    pub run_mode: Option<RunMode>,
    pub invoker: Option<InvokerKind>,
    pub model: Option<String>,
}

/// Apply command-line overrides to the loaded config.
pub fn apply_overrides(mut base: DroverConfig, overrides: &RunOverrides) -> Result<DroverConfig> {
    if let Some(max_iterations) = overrides.max_iterations {
        base.max_iterations = Some(max_iterations);
    }
    if let Some(delay_secs) = overrides.delay_secs {
        base.delay_secs = delay_secs;
    }
    if let Some(run_mode) = overrides.run_mode {
        base.run_mode = run_mode;
    }
    if let Some(kind) = overrides.invoker {
        base.invoker.kind = kind;
    }
    if let Some(model) = &overrides.model {
        base.invoker.model = Some(model.clone());
    }
    base.validate()?;
    Ok(base)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DroverConfig::default()`.
pub fn load_config(path: &Path) -> Result<DroverConfig> {
    if !path.exists() {
        let cfg = DroverConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DroverConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DroverConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, DroverConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        let cfg = DroverConfig {
            max_iterations: Some(25),
            run_mode: RunMode::Production,
            invoker: InvokerConfig {
                kind: InvokerKind::Command,
                model: Some("claude-sonnet-4-5".to_string()),
                ..InvokerConfig::default()
            },
            ..DroverConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "run_mode = \"production\"\ndelay_secs = 0\n\n[invoker]\nretries = 2\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.run_mode, RunMode::Production);
        assert_eq!(cfg.delay_secs, 0);
        assert_eq!(cfg.invoker.retries, 2);
        assert_eq!(cfg.invoker.kind, InvokerKind::Stub);
        assert_eq!(cfg.checklist_file, PathBuf::from("feature_list.json"));
        assert_eq!(cfg.max_iterations, None);
    }

    #[test]
    fn rejects_zero_iteration_bound() {
        let cfg = DroverConfig {
            max_iterations: Some(0),
            ..DroverConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn command_invoker_requires_command() {
        let cfg = DroverConfig {
            invoker: InvokerConfig {
                kind: InvokerKind::Command,
                command: Vec::new(),
                ..InvokerConfig::default()
            },
            ..DroverConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overrides_win_over_file_values() {
        let base = DroverConfig {
            max_iterations: Some(10),
            delay_secs: 3,
            ..DroverConfig::default()
        };
        let merged = apply_overrides(
            base,
            &RunOverrides {
                max_iterations: Some(2),
                delay_secs: Some(0),
                run_mode: Some(RunMode::Production),
                invoker: Some(InvokerKind::Command),
                model: Some("claude-opus".to_string()),
            },
        )
        .expect("merge");

        assert_eq!(merged.max_iterations, Some(2));
        assert_eq!(merged.delay_secs, 0);
        assert_eq!(merged.run_mode, RunMode::Production);
        assert_eq!(merged.invoker.kind, InvokerKind::Command);
        assert_eq!(merged.invoker.model.as_deref(), Some("claude-opus"));
    }

    #[test]
    fn empty_overrides_keep_base() {
        let base = DroverConfig::default();
        let merged = apply_overrides(base.clone(), &RunOverrides::default()).expect("merge");
        assert_eq!(merged, base);
    }

    #[test]
    fn override_zero_bound_is_rejected() {
        let overrides = RunOverrides {
            max_iterations: Some(0),
            ..RunOverrides::default()
        };
        assert!(apply_overrides(DroverConfig::default(), &overrides).is_err());
    }
}
