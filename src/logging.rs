//! Tracing subscriber setup for the CLI.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `loopimg=debug`.
pub const LOG_ENV: &str = "LOOPIMG_LOG";

/// Install the global subscriber. Falls back to `RUST_LOG`, then `info`.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));

    // A second init (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
