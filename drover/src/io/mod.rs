//! Side-effecting collaborators of the session loop.

pub mod checklist;
pub mod command;
pub mod config;
pub mod invoker;
pub mod process;
pub mod progress_log;
pub mod prompt;
