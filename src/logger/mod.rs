//! Structured logging setup.
//!
//! Everything goes to stderr through `tracing-subscriber`'s fmt layer so that
//! stdout stays free for machine-readable CLI output. `SENTRY_LOG` takes an
//! `EnvFilter` directive and overrides the verbosity flag.

use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive such as `proximity_sentry=debug`.
pub const LOG_ENV: &str = "SENTRY_LOG";

/// Default filter directive for a `-v` count.
#[must_use]
pub const fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init(verbosity: u8) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
