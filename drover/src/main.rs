//! Autonomous agent loop.
//!
//! Runs a coding agent session after session against a project directory,
//! starting with the initializer prompt until `feature_list.json` exists and
//! continuing with the coding prompt until every feature passes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use drover::console::ConsoleObserver;
use drover::core::types::{Mode, RunMode};
use drover::exit_codes;
use drover::io::checklist::ChecklistStore;
use drover::io::config::{
    CONFIG_FILE_NAME, DroverConfig, InvokerKind, RunOverrides, apply_overrides, load_config,
    write_config,
};
use drover::io::invoker::build_invoker;
use drover::io::prompt::{CODING_PROMPT_FILE, INITIALIZER_PROMPT_FILE};
use drover::logging;
use drover::session::{SessionConfig, SessionLoop};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(
    name = "drover",
    version,
    about = "Drive a coding agent session by session until its feature checklist passes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run agent sessions until a stop condition is met.
    Run(RunArgs),
    /// Print checklist progress and the mode the next run starts in.
    Status {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Config file (default: `<project-dir>/drover.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write a default `drover.toml` and create the prompts directory.
    Init {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory the agent works in.
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,
    /// Config file (default: `<project-dir>/drover.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Stop after this many sessions.
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Seconds to wait between sessions.
    #[arg(long)]
    delay_secs: Option<u64>,
    /// `demo` stops after one session; `production` loops until complete.
    #[arg(long)]
    mode: Option<RunMode>,
    /// `stub` prints the prompt; `command` runs the configured agent.
    #[arg(long)]
    invoker: Option<InvokerKind>,
    /// Model passed to the agent command.
    #[arg(long)]
    model: Option<String>,
}

impl RunArgs {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            max_iterations: self.max_iterations,
            delay_secs: self.delay_secs,
            run_mode: self.mode,
            invoker: self.invoker,
            model: self.model.clone(),
        }
    }
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::Status {
            project_dir,
            config,
        } => cmd_status(&project_dir, config.as_deref()),
        Command::Init { project_dir, force } => cmd_init(&project_dir, force),
    }
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let project_dir = absolute_dir(&args.project_dir)?;
    let config_path = config_path(&project_dir, args.config.as_deref());
    let cfg = apply_overrides(load_config(&config_path)?, &args.overrides())
        .with_context(|| format!("config {}", config_path.display()))?;
    let session_config = SessionConfig::resolve(&project_dir, &cfg);
    let invoker = build_invoker(
        &cfg.invoker,
        &project_dir,
        &session_config.sessions_log_dir(),
    )?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(async move {
        let session_loop = SessionLoop::new(session_config, invoker);
        let cancel = session_loop.cancellation_token();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    debug!("ctrl_c received, stopping session loop");
                    cancel.cancel();
                }
                Err(err) => warn!(err = %err, "ctrl-c signal handler failed"),
            }
        });
        let mut console = ConsoleObserver::stdout();
        session_loop.run(&mut console).await
    })?;
    Ok(exit_codes::OK)
}

fn cmd_status(project_dir: &Path, config: Option<&Path>) -> Result<i32> {
    let project_dir = absolute_dir(project_dir)?;
    let config_path = config_path(&project_dir, config);
    let cfg = load_config(&config_path)
        .with_context(|| format!("config {}", config_path.display()))?;
    let config = SessionConfig::resolve(&project_dir, &cfg);
    let snapshot = ChecklistStore::new(&config.checklist_path).snapshot();
    let mode = Mode::initial(snapshot.is_initialized());

    println!("Checklist: {}", config.checklist_path.display());
    println!("Progress: {}", snapshot.progress_line());
    println!("Next session: {} ({} agent)", mode, mode.agent_label());
    if snapshot.is_complete() {
        println!("All features passing.");
        return Ok(exit_codes::COMPLETE);
    }
    Ok(exit_codes::OK)
}

fn cmd_init(project_dir: &Path, force: bool) -> Result<i32> {
    let project_dir = absolute_dir(project_dir)?;
    let config_path = project_dir.join(CONFIG_FILE_NAME);
    let cfg = DroverConfig::default();

    if force || !config_path.exists() {
        write_config(&config_path, &cfg)?;
        println!("wrote {}", config_path.display());
    } else {
        println!("kept existing {}", config_path.display());
    }

    let prompts_dir = project_dir.join(&cfg.prompts_dir);
    fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir {}", prompts_dir.display()))?;
    for file in [INITIALIZER_PROMPT_FILE, CODING_PROMPT_FILE] {
        if !prompts_dir.join(file).exists() {
            println!("add your prompt at {}", prompts_dir.join(file).display());
        }
    }
    Ok(exit_codes::OK)
}

fn config_path(project_dir: &Path, config: Option<&Path>) -> PathBuf {
    config.map_or_else(|| project_dir.join(CONFIG_FILE_NAME), Path::to_path_buf)
}

fn absolute_dir(dir: &Path) -> Result<PathBuf> {
    std::path::absolute(dir).with_context(|| format!("resolve project dir {}", dir.display()))
}
