//! Structured-logging initialization
//!
//! All binaries and tests route diagnostics through `tracing`. Call
//! [`init`] once at startup; library code only emits events and never
//! installs a subscriber of its own.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// Filtering is controlled by `RUST_LOG` (e.g. `RUST_LOG=bugle_engine=debug`);
/// `default_directive` applies when the variable is unset.
///
/// Safe to call more than once: subsequent calls are no-ops.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Convenience wrapper used by tests: warnings and above only.
pub fn init_for_tests() {
    init("warn");
}
