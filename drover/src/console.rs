//! Operator-facing console output for `drover run`.

use std::io::{self, Write};
use std::time::Duration;

use tracing::debug;

use crate::core::policy::LoopStop;
use crate::core::types::{Mode, RunMode};
use crate::session::{LoopOutcome, RunStart, SessionObserver, SessionOutcome, SessionReport};

const WIDTH: usize = 70;

/// Prints banners and progress lines as the loop advances.
pub struct ConsoleObserver<W> {
    out: W,
}

impl ConsoleObserver<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleObserver<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, text: &str) {
        if let Err(err) = self.out.write_all(text.as_bytes()).and_then(|()| self.out.flush()) {
            debug!(err = %err, "console write failed");
        }
    }
}

fn banner(title: &str) -> String {
    let rule = "=".repeat(WIDTH);
    format!("\n{rule}\n  {title}\n{rule}\n\n")
}

fn mode_title(mode: Mode) -> &'static str {
    match mode {
        Mode::Bootstrap => "INITIALIZER AGENT",
        Mode::Incremental => "CODING AGENT",
    }
}

impl<W: Write> SessionObserver for ConsoleObserver<W> {
    fn on_start(&mut self, start: &RunStart) {
        let mut text = banner("drover - autonomous agent loop");
        text.push_str(&format!("Project: {}\n", start.project_dir.display()));
        text.push_str(&format!("Run mode: {}\n", start.run_mode));
        match start.max_iterations {
            Some(max) => text.push_str(&format!("Max iterations: {max}\n")),
            None => text.push_str("Max iterations: unlimited (runs until completion)\n"),
        }
        if start.is_first_run {
            text.push_str("\nFresh start - will use the INITIALIZER AGENT\n");
            text.push_str("The first session can take a long time while the checklist is generated.\n");
        } else {
            text.push_str("\nContinuing existing project\n");
            text.push_str(&format!("\nProgress: {}\n", start.snapshot.progress_line()));
        }
        self.emit(&text);
    }

    fn on_session_start(&mut self, iteration: u32, mode: Mode) {
        let mut text = banner(&format!("SESSION {iteration}: {}", mode_title(mode)));
        text.push_str(&format!("Running {}...\n\n", mode_title(mode)));
        self.emit(&text);
    }

    fn on_session_end(&mut self, report: &SessionReport) {
        let mut text = match &report.outcome {
            SessionOutcome::Completed { summary: Some(summary) } => {
                format!("\nAgent session complete: {summary}\n")
            }
            SessionOutcome::Completed { summary: None } => "\nAgent session complete.\n".to_string(),
            SessionOutcome::Failed { reason } => format!("\nAgent session failed: {reason}\n"),
        };
        text.push_str(&format!("\nProgress: {}\n", report.snapshot.progress_line()));
        if !report.logged {
            text.push_str("(progress entry could not be written, see logs)\n");
        }
        self.emit(&text);
    }

    fn on_waiting(&mut self, delay: Duration) {
        self.emit(&format!("\nAuto-continue in {}s...\n", delay.as_secs()));
    }

    fn on_stop(&mut self, outcome: &LoopOutcome) {
        let mut text = String::new();
        match outcome.stop {
            LoopStop::DemoComplete => {
                let rule = "=".repeat(WIDTH);
                text.push_str(&format!(
                    "\n{rule}\n  DEMO MODE - stopping after one session\n  Use --mode {} to loop until every feature passes\n{rule}\n",
                    RunMode::Production
                ));
            }
            LoopStop::MaxIterationsReached { max_iterations } => {
                text.push_str(&format!("\nReached max iterations ({max_iterations})\n"));
                text.push_str("To continue, run again without --max-iterations\n");
            }
            LoopStop::ChecklistComplete => text.push_str("\nAll features passing.\n"),
            LoopStop::Interrupted => {
                text.push_str("\n\nInterrupted by user.\n");
                text.push_str("To resume, run the same command again.\n");
            }
        }
        text.push_str(&banner("SESSION COMPLETE"));
        text.push_str(&format!(
            "Sessions run: {}\nProgress: {}\n",
            outcome.iterations_executed,
            outcome.final_snapshot.progress_line()
        ));
        self.emit(&text);
    }
}
