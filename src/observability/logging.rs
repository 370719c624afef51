//! # Logging
//!
//! `tracing-subscriber` initialization. Must run before anything else at
//! startup since every other module logs through `tracing` immediately.

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `format` is `--log-format`'s
/// value (`text` or `json`, validated by `clap` before this is called).
/// The filter defaults to `info` and is overridable via `RUST_LOG`.
pub fn init(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
