//! Tracing setup for the `xpuwrap` binary.
//!
//! Filter precedence: `RUST_LOG`, then `XPUWRAP_LOG`, then the CLI default
//! (`warn`, or `debug` with `--verbose`). Logs go to stderr so generated
//! code written to stdout stays clean.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "XPUWRAP_LOG";

/// Pick the filter directive from the two environment variables.
pub fn filter_directive(rust_log: Option<&str>, xpuwrap_log: Option<&str>, verbose: bool) -> String {
    rust_log
        .or(xpuwrap_log)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| if verbose { "xpuwrap=debug" } else { "warn" }.to_string())
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(verbose: bool) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let own_log = std::env::var(LOG_ENV).ok();
    let directive = filter_directive(rust_log.as_deref(), own_log.as_deref(), verbose);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("warning: invalid log filter '{}': {}", directive, e);
        EnvFilter::new("warn")
    });

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}
