//! # Logging Setup
//!
//! Console-only logging via the tracing ecosystem, designed for
//! containerized services where logs go to stdout. Log levels are taken from
//! `RUST_LOG` with an `info` fallback.

use tracing_subscriber::EnvFilter;

/// Initialize console logging.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .try_init();
}
