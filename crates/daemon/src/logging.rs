//! Tracing subscriber setup
//!
//! - `RUST_LOG`: filter directives (default `photospec=info`)
//! - `PHOTOSPEC_LOG_FORMAT`: `json` or `pretty` (default)
//! - `PHOTOSPEC_LOG_DIR`: also write a daily-rotated `photospec.log` there

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "photospec=info";

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init_logging() -> Option<WorkerGuard> {
    let log_format = std::env::var("PHOTOSPEC_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_writer, guard) = match std::env::var_os("PHOTOSPEC_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "photospec.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(file_writer.map(|w| fmt::layer().json().with_writer(w)))
                .init();
        }
        _ => {
            // Development: pretty console, plain file
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
                .init();
        }
    }

    guard
}
