//! Tracing subscriber bootstrap.
//!
//! Installs a console fmt layer and, when a log file is configured, a JSON
//! file layer with its own level filter. Initialization is idempotent so
//! tests and embedders can call it freely.

use crate::view::LoggingConfig;
use std::sync::Once;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static INIT: Once = Once::new();

/// Installs the global tracing subscriber from the `logging` group.
///
/// The console layer honors `console_level` (already forced to `error` by
/// quiet mode during binding); the optional file layer writes JSON lines at
/// `file_level`. A second call is a no-op.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        let console_filter =
            EnvFilter::try_new(&config.console_level).unwrap_or_else(|_| EnvFilter::new("info"));
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(console_filter);

        let file_layer = config.log_file.as_ref().and_then(|path| {
            let file = match std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
            {
                Ok(file) => file,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "cannot open log file");
                    return None;
                }
            };
            let file_filter =
                EnvFilter::try_new(&config.file_level).unwrap_or_else(|_| EnvFilter::new("debug"));
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::sync::Arc::new(file))
                    .with_filter(file_filter),
            )
        });

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .init();
    });
}
