//! Library half of the `debug-gts` binary: command implementations and
//! shared helpers, kept here so tests can call them directly.

pub mod commands;

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// Install the stderr log subscriber.
///
/// `RUST_LOG` controls the filter (default `warn`); `verbose` forces `debug`.
/// Calling this more than once is harmless.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}
