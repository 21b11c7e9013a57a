//! Structured logging initialization.
//!
//! The `RUST_LOG` environment variable takes precedence over the
//! configured level. Initialization is idempotent: later calls are
//! no-ops, so library tests can call it freely.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LoggingConfig};

/// Initialize the logging subsystem.
pub fn init(config: &LoggingConfig) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(&config.level)
    };

    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_thread_names(config.thread_names),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_thread_names(config.thread_names),
            )
            .try_init(),
    };
    // Already initialized elsewhere; keep the existing subscriber.
    drop(result);
}
