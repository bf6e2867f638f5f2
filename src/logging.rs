//! Logging configuration using tracing.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "SAGAVISOR_LOG";

/// Installs a global `tracing` subscriber writing to stderr.
///
/// Level is controlled by the `SAGAVISOR_LOG` environment variable and
/// defaults to `sagavisor=info,warn`. Fails if a global subscriber is
/// already installed.
///
/// # Examples
/// ```bash
/// SAGAVISOR_LOG=debug cargo run
/// SAGAVISOR_LOG=sagavisor=trace cargo run
/// ```
pub fn init() -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("sagavisor=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .try_init()
}
