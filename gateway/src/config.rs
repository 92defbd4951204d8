//! Environment-driven configuration.

use std::time::Duration;
use switchboard_core::GatewayConfig;
use thiserror::Error;

/// A configuration variable could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric variable did not parse.
    #[error("{var} must be a number, got '{value}'")]
    NotANumber {
        /// Variable name.
        var: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Broker URL.
    pub amqp_url: String,
    /// HTTP bind address.
    pub bind_addr: String,
    /// HTTP port.
    pub http_port: u16,
    /// Correlation-engine tunables.
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Read configuration from the environment, with defaults.
    ///
    /// | variable              | default                 |
    /// |-----------------------|-------------------------|
    /// | `AMQP_URL`            | `amqp://localhost:5672` |
    /// | `BIND_ADDR`           | `0.0.0.0`               |
    /// | `HTTP_PORT`           | `8080`                  |
    /// | `REQUEST_DEADLINE_MS` | `15000`                 |
    /// | `SWEEP_INTERVAL_MS`   | `2000`                  |
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for malformed numeric values; a typo should
    /// stop startup, not silently fall back.
    pub fn from_env() -> Result<Self, ConfigError> {
        let amqp_url =
            std::env::var("AMQP_URL").unwrap_or_else(|_| "amqp://localhost:5672".to_owned());
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_owned());
        let http_port = parse_var("HTTP_PORT", 8080)?;
        let deadline_ms: u64 = parse_var("REQUEST_DEADLINE_MS", 15_000)?;
        let sweep_ms: u64 = parse_var("SWEEP_INTERVAL_MS", 2_000)?;

        Ok(Self {
            amqp_url,
            bind_addr,
            http_port,
            gateway: GatewayConfig {
                reply_deadline: Duration::from_millis(deadline_ms),
                sweep_interval: Duration::from_millis(sweep_ms),
                ..GatewayConfig::default()
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::NotANumber { var, value }),
        Err(_) => Ok(default),
    }
}
