use std::error::Error;
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/** create a non blocking tracing file appender, one file per run target */
pub fn setup_file_appender<P: AsRef<Path>>(datadir: P, who: &str) -> (NonBlocking, WorkerGuard) {
    let file_appender = rolling::never(datadir.as_ref(), format!("{}.log", who));

    tracing_appender::non_blocking(file_appender)
}

/** create a RUST_LOG env based log filter with the given default level */
pub fn env_filter(default_level: Level) -> EnvFilter {
    EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy()
}

/**
 * Initialize tracing-subscriber with env filter based on RUST_LOG env variable.
 * fmt layer is used to print logs to stderr, stdout is kept for results.
 * fmt layer with custom writer is used to write logs to log file in datadir.
 * `log` records from the RPC client crates are bridged in by tracing-log.
*/
pub fn init_tracing_subscriber<P: AsRef<Path>>(
    datadir: P,
    who: &str,
    default_level: Level,
) -> Result<LogGuard, Box<dyn Error>> {
    std::fs::create_dir_all(datadir.as_ref())?;
    let (file_writer, file_guard) = setup_file_appender(datadir, who);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .with_target(false)
        .with_source_location(false)
        .compact();

    let stderr_layer = fmt::layer().event_format(format.clone()).with_writer(std::io::stderr);
    let file_layer = fmt::layer()
        .event_format(format.with_ansi(false))
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(env_filter(default_level))
        .try_init()?;
    Ok(LogGuard { _file_appender_guard: file_guard })
}

/// Keeps the file appender flushing until dropped
pub struct LogGuard {
    _file_appender_guard: WorkerGuard,
}
