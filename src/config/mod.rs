//! # Configuration
//!
//! Layered configuration for the message bus and its host process.
//!
//! Values are resolved in order, later sources winning:
//!
//! 1. Built-in defaults (`AppConfig::default()`)
//! 2. An optional YAML file passed on the command line
//! 3. Environment variables prefixed with `APP_`, nested keys separated by `__`
//!    (for example `APP_MESSAGEBUS__BUFFER_SIZE=64`)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use messagebus_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load(None)?;
//! let buffer = manager.config().messagebus.buffer_size;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment (development, test, production)
    pub environment: String,

    /// Log output settings
    pub logging: LoggingConfig,

    /// In-process message bus settings
    pub messagebus: MessageBusConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: ConfigManager::detect_environment(),
            logging: LoggingConfig::default(),
            messagebus: MessageBusConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.environment.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "environment",
                &self.environment,
                "environment cannot be empty",
            ));
        }
        self.logging.validate()?;
        self.messagebus.validate()
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset. Falls back to an
    /// environment-dependent level when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    pub format: LogFormat,
}

impl LoggingConfig {
    fn validate(&self) -> ConfigResult<()> {
        match &self.level {
            Some(level) if level.trim().is_empty() => Err(ConfigurationError::invalid_value(
                "logging.level",
                level,
                "log level cannot be blank",
            )),
            _ => Ok(()),
        }
    }
}

/// Message bus configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MessageBusConfig {
    /// Capacity of the ingress queue between publishers and the dispatch loop
    pub buffer_size: usize,

    /// How long `publish` waits for queue capacity before failing
    pub publish_timeout_ms: u64,

    /// Upper bound on handler invocations running at the same time
    pub max_concurrent_deliveries: usize,

    /// Per-invocation limit applied on top of any publish-time deadline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler_timeout_ms: Option<u64>,

    /// How long shutdown waits for in-flight handler invocations
    pub drain_timeout_ms: u64,

    /// Log every handler failure at error level; when false only counters move
    pub log_handler_errors: bool,
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            publish_timeout_ms: 5000,
            max_concurrent_deliveries: 256,
            handler_timeout_ms: None,
            drain_timeout_ms: 30_000,
            log_handler_errors: true,
        }
    }
}

impl MessageBusConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "messagebus.buffer_size",
                self.buffer_size,
                "must be greater than zero",
            ));
        }
        if self.publish_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "messagebus.publish_timeout_ms",
                self.publish_timeout_ms,
                "must be greater than zero",
            ));
        }
        if self.max_concurrent_deliveries == 0 {
            return Err(ConfigurationError::invalid_value(
                "messagebus.max_concurrent_deliveries",
                self.max_concurrent_deliveries,
                "must be greater than zero",
            ));
        }
        if self.handler_timeout_ms == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "messagebus.handler_timeout_ms",
                0,
                "must be greater than zero when set",
            ));
        }
        if self.drain_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "messagebus.drain_timeout_ms",
                self.drain_timeout_ms,
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
