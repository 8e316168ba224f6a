//! Error types for the message bus.
//!

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messagebus::BusState;

/// Errors surfaced synchronously to callers of the bus.
///
/// Dispatch-side failures (a handler returning an error, panicking, or
/// running past its deadline) never appear here; they are logged and
/// counted by the dispatch loop instead. See [`HandlerError`].
#[derive(Debug, Error)]
pub enum MessageBusError {
    #[error("Encoding error for topic '{topic}': {source}")]
    Encoding {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Message bus is closed")]
    BrokerClosed,

    #[error("Message bus no longer accepts subscriptions (state: {state})")]
    AlreadyRunning { state: BusState },

    #[error("Transport error on topic '{topic}': {reason}")]
    Transport { topic: String, reason: String },

    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl MessageBusError {
    pub fn transport(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_topic(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by misusing the register-then-start lifecycle.
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            MessageBusError::BrokerClosed | MessageBusError::AlreadyRunning { .. }
        )
    }
}

/// Errors returned from [`Handler::handle`](crate::messagebus::Handler::handle).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Handler failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, MessageBusError>;
