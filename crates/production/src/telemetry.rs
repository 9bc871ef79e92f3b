//! Logging initialization.
//!
//! Installs a global `tracing` subscriber: an `EnvFilter` (RUST_LOG wins,
//! otherwise the configured level) feeding either the human-readable or the
//! JSON formatter.

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer, Registry};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid log filter {filter:?}: {source}")]
    Filter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("Failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// `[telemetry]` section of the node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Filter directive used when RUST_LOG is unset, e.g. `info,favo_bft=debug`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit one JSON object per event instead of formatted lines.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_with_target() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
            with_target: default_with_target(),
        }
    }
}

impl TelemetryConfig {
    /// Build the filter: RUST_LOG if set and valid, else `log_level`.
    pub fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.log_level).map_err(|source| TelemetryError::Filter {
            filter: self.log_level.clone(),
            source,
        })
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = config.env_filter()?;

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.with_target)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(config.with_target)
            .boxed()
    };

    let subscriber = Registry::default().with(env_filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::debug!(json = config.json, log_level = %config.log_level, "Telemetry initialized");
    Ok(())
}
