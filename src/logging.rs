//! Tracing subscriber setup.
//!
//! Logs go to stderr so command output on stdout stays clean. The filter
//! comes from `RUST_LOG`; without it the level is `info`, or `debug` with
//! `--verbose`.

use tracing_subscriber::EnvFilter;

pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second init (tests, embedding binaries) is not an error.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init();
}
