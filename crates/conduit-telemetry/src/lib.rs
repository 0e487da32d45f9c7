//! Tracing initialization for the conduit bridge.
//!
//! Builds a `tracing-subscriber` registry with an env-filter layer
//! (`RUST_LOG` wins over the configured default level) and either plain
//! or JSON formatted output.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by the `RUST_LOG` env var.
    pub log_level: Level,
    /// Emit JSON-formatted log lines instead of human-readable ones.
    pub json_output: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            json_output: false,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; later calls are no-ops (the first
/// subscriber wins), which keeps tests that each initialize telemetry
/// from panicking.
pub fn init(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_output {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, Level::INFO);
        assert!(!config.json_output);
    }

    #[test]
    fn init_is_idempotent() {
        let config = TelemetryConfig::default();
        init(&config);
        init(&config);
    }
}
