//! Tracing setup for the `finch-disk` binary.
//!
//! Everything goes to stderr, filtered by `RUST_LOG` (default `warn`). With
//! `FINCH_DISK_LOG=1` each run is also appended to
//! `~/.finch/logs/finch-disk.log` at `info`, next to the disk it manages, so
//! a failed VM start can be diagnosed after the fact.

use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "FINCH_DISK_LOG";
pub const LOG_FILE: &str = "finch-disk.log";

/// Flushes the file layer when dropped. Hold it until `main` returns.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. `log_dir` is only touched when file
/// logging is switched on.
pub fn init(log_dir: &Path) -> io::Result<LogGuard> {
    let stderr = fmt::layer().with_writer(io::stderr);

    if !file_logging_enabled(std::env::var(LOG_ENV).ok().as_deref()) {
        tracing_subscriber::registry()
            .with(env_filter("warn"))
            .with(stderr)
            .init();
        return Ok(LogGuard { _file: None });
    }

    prepare_log_dir(log_dir)?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, LOG_FILE));

    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(stderr)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();

    Ok(LogGuard { _file: Some(guard) })
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

fn file_logging_enabled(value: Option<&str>) -> bool {
    value == Some("1")
}

fn prepare_log_dir(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("create log directory {}: {e}", dir.display()),
        )
    })
}
