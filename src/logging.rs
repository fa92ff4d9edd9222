use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Install the global subscriber: console output plus an optional daily
/// rolling file under `log_dir`. `RUST_LOG` overrides the configured level.
///
/// Returns the appender guard; keep it alive for the life of the process or
/// buffered file output is lost.
pub fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},polyfuse=debug", config.level)));

    // `rolling::daily` panics if it cannot create the file, so check writability first
    let (file_layer, guard) = match config.log_dir.as_deref() {
        Some(dir) if log_dir_writable(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "polyfuse.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false) // No color codes in file
                .with_target(true);
            (Some(layer), Some(guard))
        }
        Some(dir) => {
            eprintln!(
                "Warning: Could not write to log directory {}, file logging disabled",
                dir
            );
            (None, None)
        }
        None => (None, None),
    };

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}

/// Minimal logging for tests and one-off tools
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn log_dir_writable(dir: &str) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let marker = std::path::Path::new(dir).join(".polyfuse_write_test");
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&marker)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}
