//! Tracing subscriber installation for the binaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
///
/// Filtering follows `RUST_LOG`; when unset, `default_directive` applies
/// (the binaries pass `"info"`). Calling this twice is a no-op so tests
/// that construct components directly are unaffected.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
