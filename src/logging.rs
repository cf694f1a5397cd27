//! Structured logging setup.
//!
//! Installs a `tracing` subscriber that honours `RUST_LOG` (default
//! `overwatch=info`, or `overwatch=debug` with `--verbose`) and switches to
//! JSON lines when `RUST_LOG_FORMAT=json`. Output goes to stderr so the
//! report printed on stdout stays clean.

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. Later calls are no-ops.
pub fn init(verbose: bool) {
    let default_directive = if verbose {
        "overwatch=debug"
    } else {
        "overwatch=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let is_json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false);

    if is_json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
