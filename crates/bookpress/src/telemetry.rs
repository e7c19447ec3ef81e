//! Process-wide logging setup.
//!
//! Library code logs through both `log` and `tracing`; records from the `log`
//! facade are forwarded into the tracing subscriber so spans such as
//! `run_job` and `submit_order` carry them.

use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use crate::config::LoggingConfig;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("A global subscriber is already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Failed to install log bridge: {0}")]
    LogBridge(#[from] log::SetLoggerError),
}

/// `RUST_LOG` wins over the configured level.
pub fn env_filter(default_level: &str) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_level).map_err(|e| TelemetryError::Filter {
        filter: default_level.to_string(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber. Call once, before any work is spawned.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(&config.level)?;

    if config.json {
        let subscriber = Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json());
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        tracing::subscriber::set_global_default(subscriber)?;
    }

    tracing_log::LogTracer::init()?;
    Ok(())
}
