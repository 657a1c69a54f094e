//! Mode-keyed prompt payloads loaded from the prompts directory.
//!
//! - `Bootstrap` -> `initializer_prompt.md`
//! - `Incremental` -> `coding_prompt.md`
//!
//! Payloads are re-read for every session so edits between sessions take
//! effect without restarting the loop.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior, context};
use thiserror::Error;
use tracing::debug;

use crate::core::snapshot::ChecklistSnapshot;
use crate::core::types::Mode;

pub const INITIALIZER_PROMPT_FILE: &str = "initializer_prompt.md";
pub const CODING_PROMPT_FILE: &str = "coding_prompt.md";

/// Why a prompt could not be produced. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("{mode} prompt not found: {}", path.display())]
    Missing { mode: Mode, path: PathBuf },
    #[error("read {mode} prompt {}", path.display())]
    Read {
        mode: Mode,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("render {mode} prompt {}", path.display())]
    Render {
        mode: Mode,
        path: PathBuf,
        #[source]
        source: minijinja::Error,
    },
}

/// Values exposed to prompt templates.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub iteration: u32,
    pub snapshot: ChecklistSnapshot,
    pub project_dir: PathBuf,
}

/// A resolved payload ready to hand to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    mode: Mode,
    source: PathBuf,
    text: String,
}

impl Prompt {
    pub fn new(mode: Mode, source: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            mode,
            source: source.into(),
            text: text.into(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// First `max_chars` characters, with `...` appended when cut.
    pub fn preview(&self, max_chars: usize) -> String {
        match self.text.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &self.text[..idx]),
            None => self.text.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptProvider {
    prompts_dir: PathBuf,
    render_templates: bool,
}

impl PromptProvider {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
            render_templates: false,
        }
    }

    /// Render payloads as minijinja templates before handing them out.
    pub fn with_templates(mut self, enabled: bool) -> Self {
        self.render_templates = enabled;
        self
    }

    pub fn source_path(&self, mode: Mode) -> PathBuf {
        let file = match mode {
            Mode::Bootstrap => INITIALIZER_PROMPT_FILE,
            Mode::Incremental => CODING_PROMPT_FILE,
        };
        self.prompts_dir.join(file)
    }

    /// Load the raw payload for `mode`.
    pub fn resolve(&self, mode: Mode) -> Result<Prompt, PromptError> {
        let path = self.source_path(mode);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(PromptError::Missing { mode, path });
            }
            Err(source) => return Err(PromptError::Read { mode, path, source }),
        };
        debug!(%mode, path = %path.display(), bytes = text.len(), "prompt loaded");
        Ok(Prompt {
            mode,
            source: path,
            text,
        })
    }

    /// Load the payload for `mode` and, if enabled, render it with `ctx`.
    pub fn resolve_for(&self, mode: Mode, ctx: &PromptContext) -> Result<Prompt, PromptError> {
        let prompt = self.resolve(mode)?;
        if !self.render_templates {
            return Ok(prompt);
        }
        let text = render_template(mode, &prompt.text, ctx).map_err(|source| {
            PromptError::Render {
                mode,
                path: prompt.source.clone(),
                source,
            }
        })?;
        Ok(Prompt { text, ..prompt })
    }
}

fn render_template(
    mode: Mode,
    source: &str,
    ctx: &PromptContext,
) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.render_str(
        source,
        context! {
            mode => mode.as_str(),
            iteration => ctx.iteration,
            passing_count => ctx.snapshot.passing_count,
            total_count => ctx.snapshot.total_count,
            project_dir => ctx.project_dir.display().to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_with(files: &[(&str, &str)]) -> (tempfile::TempDir, PromptProvider) {
        let temp = tempfile::tempdir().expect("tempdir");
        for (name, body) in files {
            fs::write(temp.path().join(name), body).expect("write prompt");
        }
        let provider = PromptProvider::new(temp.path());
        (temp, provider)
    }

    fn ctx() -> PromptContext {
        PromptContext {
            iteration: 4,
            snapshot: ChecklistSnapshot {
                passing_count: 10,
                total_count: 40,
            },
            project_dir: PathBuf::from("/work/app"),
        }
    }

    #[test]
    fn resolves_one_payload_per_mode() {
        let (_temp, provider) = provider_with(&[
            (INITIALIZER_PROMPT_FILE, "set up the project"),
            (CODING_PROMPT_FILE, "implement one feature"),
        ]);

        let bootstrap = provider.resolve(Mode::Bootstrap).expect("bootstrap");
        assert_eq!(bootstrap.text(), "set up the project");
        assert_eq!(bootstrap.mode(), Mode::Bootstrap);
        assert!(bootstrap.source().ends_with(INITIALIZER_PROMPT_FILE));

        let incremental = provider.resolve(Mode::Incremental).expect("incremental");
        assert_eq!(incremental.text(), "implement one feature");
        assert!(incremental.source().ends_with(CODING_PROMPT_FILE));
    }

    #[test]
    fn missing_source_names_mode_and_path() {
        let (_temp, provider) = provider_with(&[(CODING_PROMPT_FILE, "implement")]);

        let err = provider.resolve(Mode::Bootstrap).unwrap_err();
        assert!(matches!(err, PromptError::Missing { mode: Mode::Bootstrap, .. }));
        let message = err.to_string();
        assert!(message.starts_with("bootstrap prompt not found"));
        assert!(message.contains(INITIALIZER_PROMPT_FILE));
    }

    #[test]
    fn raw_payload_is_not_rendered_by_default() {
        let (_temp, provider) = provider_with(&[(CODING_PROMPT_FILE, "keep {{ braces }}\n")]);

        let prompt = provider
            .resolve_for(Mode::Incremental, &ctx())
            .expect("resolve");
        assert_eq!(prompt.text(), "keep {{ braces }}\n");
    }

    #[test]
    fn renders_template_context_when_enabled() {
        let (_temp, provider) = provider_with(&[(
            CODING_PROMPT_FILE,
            "Session {{ iteration }} ({{ mode }}): {{ passing_count }}/{{ total_count }} in {{ project_dir }}\n",
        )]);
        let provider = provider.with_templates(true);

        let prompt = provider
            .resolve_for(Mode::Incremental, &ctx())
            .expect("resolve");
        assert_eq!(
            prompt.text(),
            "Session 4 (incremental): 10/40 in /work/app\n"
        );
    }

    #[test]
    fn unknown_template_variable_is_render_error() {
        let (_temp, provider) = provider_with(&[(INITIALIZER_PROMPT_FILE, "{{ nope }}")]);
        let provider = provider.with_templates(true);

        let err = provider.resolve_for(Mode::Bootstrap, &ctx()).unwrap_err();
        assert!(matches!(err, PromptError::Render { mode: Mode::Bootstrap, .. }));
    }

    #[test]
    fn preview_cuts_on_char_boundary() {
        let prompt = Prompt::new(Mode::Incremental, "p.md", "héllo wörld");
        assert_eq!(prompt.preview(5), "héllo...");
        assert_eq!(prompt.preview(50), "héllo wörld");
    }
}
