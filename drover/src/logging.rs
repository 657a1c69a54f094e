//! Diagnostic tracing for the session loop.
//!
//! Tracing goes to stderr and is filtered by `RUST_LOG`. It is separate from
//! what the operator and the agent read: the console banners (`console`) and
//! the progress journal (`io/progress_log`) are written regardless of the
//! filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Used when `RUST_LOG` is unset or unparsable. Session lifecycle events
/// (start, mode switch, invocation, stop) log at info; dependencies at warn.
pub const DEFAULT_FILTER: &str = "warn,drover=info";

/// Install the global subscriber. Call once, before the loop starts.
///
/// ```bash
/// RUST_LOG=drover=debug drover run --mode production
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
