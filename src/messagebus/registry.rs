//! # Topic Registry
//!
//! Maps each topic to the handlers registered on it, in registration order.
//! Mutated only while the bus is `new`; frozen into an `Arc` when the bus
//! starts and read without locking from then on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use super::handler::Handler;
use crate::error::{MessageBusError, Result};

/// Identity of one registration, unique within a bus: `handler_<topic>_<n>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerId(String);

impl HandlerId {
    fn new(topic: &str, sequence: usize) -> Self {
        Self(format!("handler_{topic}_{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One (topic, identity, handler) binding
#[derive(Clone)]
pub struct HandlerRegistration {
    pub id: HandlerId,
    pub topic: String,
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

#[derive(Default)]
pub struct TopicRegistry {
    topics: HashMap<String, Vec<HandlerRegistration>>,
    registered: usize,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler on its declared topic and return its identity
    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<HandlerId> {
        let topic = handler.topic().to_string();
        validate_topic(&topic)?;

        let id = HandlerId::new(&topic, self.registered);
        self.registered += 1;

        self.topics
            .entry(topic.clone())
            .or_default()
            .push(HandlerRegistration {
                id: id.clone(),
                topic,
                handler,
            });

        Ok(id)
    }

    /// Handlers for `topic` in registration order; empty when none
    pub fn handlers_for(&self, topic: &str) -> &[HandlerRegistration] {
        self.topics.get(topic).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn handler_count(&self) -> usize {
        self.registered
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }
}

impl fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("topic_count", &self.topic_count())
            .field("handler_count", &self.handler_count())
            .finish()
    }
}

/// Reject topics that cannot be routed
pub(crate) fn ensure_routable(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(MessageBusError::invalid_topic(topic, "topic cannot be empty"));
    }
    if topic.chars().any(char::is_whitespace) {
        return Err(MessageBusError::invalid_topic(
            topic,
            "topic cannot contain whitespace",
        ));
    }
    Ok(())
}

/// Routable check for registration. Topics outside the `segment.segment`
/// lowercase convention are accepted with a warning.
pub(crate) fn validate_topic(topic: &str) -> Result<()> {
    ensure_routable(topic)?;
    if !follows_naming_convention(topic) {
        warn!(
            topic = %topic,
            "Topic does not follow the dot-separated lowercase naming convention"
        );
    }
    Ok(())
}

fn follows_naming_convention(topic: &str) -> bool {
    topic.split('.').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    })
}
