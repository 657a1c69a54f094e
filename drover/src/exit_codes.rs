//! Stable exit codes for drover CLI commands.

/// Command succeeded, or `drover run` stopped cleanly (including on interrupt).
pub const OK: i32 = 0;
/// Command failed: missing prompt, invalid config or another error.
pub const INVALID: i32 = 1;
/// `drover status` found every feature passing.
pub const COMPLETE: i32 = 2;
