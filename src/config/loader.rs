//! Configuration Loader
//!
//! Environment-aware configuration loading. Merges built-in defaults, an
//! optional YAML file and `APP_`-prefixed environment variables.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::AppConfig;

const ENV_PREFIX: &str = "APP";
const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: AppConfig,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration from defaults, an optional file and the process environment
    pub fn load(config_file: Option<&Path>) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_env(config_file, None)
    }

    /// Load configuration with an explicit environment variable map instead of
    /// the process environment. Useful in tests without touching global state.
    pub fn load_with_env(
        config_file: Option<&Path>,
        env_vars: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let defaults = Config::try_from(&AppConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = config_file {
            if !path.is_file() {
                return Err(ConfigurationError::FileNotFound {
                    path: path.display().to_string(),
                });
            }
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env_vars),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %config.environment,
            config_file = ?config_file.map(|p| p.display().to_string()),
            buffer_size = config.messagebus.buffer_size,
            max_concurrent_deliveries = config.messagebus.max_concurrent_deliveries,
            "Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            config_file: config_file.map(Path::to_path_buf),
        }))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    pub fn environment(&self) -> &str {
        &self.config.environment
    }

    /// Detect the deployment environment from `APP_ENV`, defaulting to development
    pub fn detect_environment() -> String {
        env::var("APP_ENV")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "development".to_string())
    }
}
