#![forbid(unsafe_code)]

//! Shared library behind the `backend` server and the `grab` client.

pub mod api;
pub mod client;
pub mod config;
pub mod extractor;
pub mod progress;
pub mod relay;
pub mod resolver;

use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "tubegrab=info,backend=info,grab=info";

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over the default
/// filter when set.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // A second install (tests, embedding) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
