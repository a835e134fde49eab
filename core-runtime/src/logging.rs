//! # Logging & Tracing Infrastructure
//!
//! Configures the `tracing-subscriber` stack: an `EnvFilter` honoring
//! `RUST_LOG` (falling back to the configured level) and a fmt layer in
//! pretty or JSON format.
//!
//! Token values, credential bodies, and image bytes are never logged;
//! log lines carry ids, counts, and durations.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Error, Result};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Call once at startup, before any
/// subsystem logs.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Logging(format!("invalid log level {:?}: {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
    };

    result.map_err(|e| Error::Logging(e.to_string()))
}
