#![allow(dead_code)]

pub mod handlers;
pub mod strategies;

pub use handlers::*;

use std::time::Duration;

use messagebus_core::config::MessageBusConfig;

pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Bus config with short timeouts so failing tests fail fast
pub fn test_config() -> MessageBusConfig {
    MessageBusConfig {
        buffer_size: 64,
        publish_timeout_ms: 1_000,
        drain_timeout_ms: 5_000,
        ..Default::default()
    }
}
