//! Tracing setup for binaries and tests embedding plangraph.

use std::path::Path;

use plangraph_config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::error::{Result, StoreError};

/// Install the global subscriber: a human-readable stderr layer and, when
/// `json_file` is set, a daily-rotated JSON file layer.
///
/// `RUST_LOG` overrides the configured filter. Keep the returned guard alive
/// for as long as file logging should flush. Calling this again once a
/// subscriber is installed is a no-op.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let (json_layer, guard) = match &config.json_file {
        Some(path) => {
            let file_name = path.file_name().ok_or_else(|| {
                StoreError::Logging(format!("log file '{}' has no file name", path.display()))
            })?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let appender = tracing_appender::rolling::daily(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(filter()),
        )
        .with(json_layer)
        .try_init();

    match installed {
        Ok(()) => Ok(guard),
        Err(e) => {
            tracing::debug!(error = %e, "Tracing subscriber already installed");
            Ok(None)
        }
    }
}
