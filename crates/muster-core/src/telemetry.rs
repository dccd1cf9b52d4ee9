//! Logging initialization
//!
//! TigerStyle: Explicit telemetry configuration, one subscriber per process.

use crate::error::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log level filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Include the module target in each line
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "muster".to_string(),
            log_level: "info".to_string(),
            json: false,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Map a `-v` count to a level: 0 info, 1 debug, 2+ trace
    pub fn with_verbosity(self, verbose: u8) -> Self {
        let level = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        self.with_log_level(level)
    }

    /// Switch to JSON output
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `MUSTER_SERVICE_NAME`: Service name (default: "muster")
    /// - `RUST_LOG`: Log level filter (default: "info")
    /// - `MUSTER_LOG_JSON`: JSON output when "true" or "1"
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("MUSTER_SERVICE_NAME").unwrap_or_else(|_| "muster".to_string());

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let json = std::env::var("MUSTER_LOG_JSON")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            service_name,
            log_level,
            json,
            with_target: true,
        }
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `config.log_level` when set. Fails if a subscriber is
/// already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.with_target);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| {
        Error::internal(format!("failed to initialize tracing subscriber: {}", e))
    })?;

    tracing::info!(
        service = %config.service_name,
        level = %config.log_level,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "muster");
        assert_eq!(config.log_level, "info");
        assert!(!config.json);
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new("registry")
            .with_log_level("warn")
            .with_json();

        assert_eq!(config.service_name, "registry");
        assert_eq!(config.log_level, "warn");
        assert!(config.json);
    }

    #[test]
    fn test_telemetry_verbosity() {
        assert_eq!(TelemetryConfig::default().with_verbosity(0).log_level, "info");
        assert_eq!(TelemetryConfig::default().with_verbosity(1).log_level, "debug");
        assert_eq!(TelemetryConfig::default().with_verbosity(5).log_level, "trace");
    }
}
