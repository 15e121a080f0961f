//! Diagnostics for the build pipeline.
//!
//! Everything goes to stderr so stdout stays free for the bundler's own
//! output. Verbosity follows `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn,modu_build=info` so build, rebuild and
/// server lifecycle lines show up without extra setup.
///
/// # Example
/// ```bash
/// RUST_LOG=modu_build=debug modu-build --watch
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,modu_build=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
