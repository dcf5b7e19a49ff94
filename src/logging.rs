//! Tracing setup for the command-line front end
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! binary's job. Links carry their own span (see `link::Instrumentation`), so
//! nothing here is global state the core depends on.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing output on stderr
///
/// Call early in main() before any logging occurs.
/// `warn` by default, `debug` with `verbose`; `RUST_LOG` overrides both.
pub fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_file(false)
                .compact(),
        )
        .with(filter)
        .try_init();
}
