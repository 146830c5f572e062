//! Logging utils.

use tracing_subscriber::EnvFilter;

/// Environment variable that controls the logging level, defaults to `error`.
pub const LOG_ENV: &str = "KESTREL_LOG";

/// Initialize stderr logging.
///
/// The runtime owns stdout (user scripts print there), so diagnostics always
/// go to stderr.
pub fn init() {
  let filter = EnvFilter::try_from_env(LOG_ENV)
    .unwrap_or_else(|_| EnvFilter::new("error"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(true)
    .init();
}
