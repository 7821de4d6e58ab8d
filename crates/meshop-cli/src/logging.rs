//! Log output for the binary
//!
//! Library crates only emit `tracing` events; this installs the subscriber.
//! `RUST_LOG` wins over `--debug`, which wins over the default.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "meshop=info";
const DEBUG_FILTER: &str = "meshop=debug";

fn filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { DEBUG_FILTER } else { DEFAULT_FILTER })
    })
}

/// Logs go to stderr so that rendered manifests on stdout stay clean
pub fn init(debug: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(debug))
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(debug)
        .init();
}
