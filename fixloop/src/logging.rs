//! Development-time tracing for debugging the controller.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. Product artifacts
//! (iteration logs under `.fixloop/iterations/`, the memory log) are written
//! regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn`.
///
/// ```bash
/// RUST_LOG=fixloop=debug fixloop run --request "fix the failing tests"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
