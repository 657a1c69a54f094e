//! Session loop that drives an external coding agent until a project's
//! feature checklist passes.
//!
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (mode selection, snapshot math,
//!   termination policy). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (checklist and progress files,
//!   prompt loading, agent processes, config). Isolated behind small types
//!   so tests can substitute them.
//!
//! [`session`] coordinates the two; [`console`] renders its progress for the
//! `drover` binary.

pub mod console;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
