//! Process-wide tracing setup.
//!
//! Library code logs through both `log` (queue, pool, db) and `tracing`
//! (pipeline spans); `log` records are forwarded into the tracing subscriber.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::{LogFormat, LoggingConfig};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Builds the filter: `RUST_LOG` when set, otherwise the configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| LoggingError::InvalidFilter {
        directive: config.level.clone(),
        message: e.to_string(),
    })
}

/// Installs the global subscriber and forwards `log` records into it.
/// Fails if logging was already initialized.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;

    tracing_log::LogTracer::init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    let installed = match config.format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            Registry::default()
                .with(filter)
                .with(fmt::layer().with_target(true)),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            Registry::default()
                .with(filter)
                .with(fmt::layer().json().with_current_span(true)),
        ),
    };

    installed.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}
