//! Structured Logger
//!
//! Wraps `tracing` with environment-based level control, a stderr console layer, and
//! an optional rolling NDJSON file layer.

use picscribe_config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the background file writer alive. Dropping it flushes pending lines.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize the global structured logger.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is harmless:
/// the second subscriber is simply not installed.
pub fn init_logger(config: &LoggingConfig) -> LogGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, file_guard) = match &config.dir {
        Some(dir) => {
            // Writes NDJSON to `{dir}/picscribe.log.YYYY-MM-DD`
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "picscribe.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_console = config
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let plain_console = (!config.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(true)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_console)
        .with(plain_console)
        .with(file_layer)
        .try_init();

    LogGuard { _file: file_guard }
}
