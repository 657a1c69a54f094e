//! Deterministic, pure logic for the session loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod machine;
pub mod policy;
pub mod snapshot;
pub mod types;
