//! # Structured Logging Module
//!
//! Environment-aware structured logging built on `tracing-subscriber`.
//! `RUST_LOG` always wins; otherwise the configured level is used, and
//! failing that a default derived from the deployment environment.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging. Safe to call more than once; only the
/// first call installs a subscriber.
pub fn init_structured_logging(config: &LoggingConfig, environment: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let directive = resolve_log_directive(config, environment);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(directive.clone()));

        let layer = match config.format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed(),
        };

        // A global subscriber may already be installed by a test harness or host
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - keeping existing one");
        }

        tracing::info!(
            environment = %environment,
            level = %directive,
            format = ?config.format,
            "Structured logging initialized"
        );
    });
}

fn resolve_log_directive(config: &LoggingConfig, environment: &str) -> String {
    config
        .level
        .clone()
        .unwrap_or_else(|| default_log_level(environment).to_string())
}

/// Get default log level based on environment
fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}
