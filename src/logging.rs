//! Logging setup: stderr for the operator, a file in the data directory for later.
//!
//! Verbosity follows `RUST_LOG` and defaults to `info`.

use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "harbor.log";

/// Keeps the non-blocking file writer alive. Dropping it flushes the log.
pub struct LoggingGuard {
  _file_guard: WorkerGuard,
}

/// Install the global subscriber, writing to stderr and `<log_dir>/harbor.log`.
pub fn init_logging(log_dir: &Path) -> io::Result<LoggingGuard> {
  std::fs::create_dir_all(log_dir)?;

  let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
  let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_writer(non_blocking_file)
    .with_ansi(false);

  // stdout is reserved for command output
  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_writer(io::stderr)
    .with_target(false);

  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(env_filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| io::Error::other(e.to_string()))?;

  Ok(LoggingGuard {
    _file_guard: file_guard,
  })
}
