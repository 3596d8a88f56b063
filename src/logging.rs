//! Logging setup for the binary.
//!
//! Diagnostics go to stderr through `tracing`; stdout is left to sink output
//! and, in worker processes, to the wire protocol. `RUST_LOG` takes
//! precedence over the level passed in.

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Later calls are ignored.
pub fn init(default_level: &str) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_writer(std::io::stderr)
    .try_init();
}
