//! Publish-time and handler-side context.
//!
//! A producer attaches an [`EventContext`] to each publish. The bus carries
//! it in the envelope and hands every handler a [`HandlerContext`] derived
//! from it, so a deadline or cancellation set by the producer reaches the
//! consumer. The broker's own run token is never passed to handlers.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context supplied by the producer at publish time
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    correlation_id: Option<Uuid>,
    deadline: Option<Instant>,
    cancellation: Option<CancellationToken>,
    metadata: HashMap<String, String>,
}

impl EventContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Propagate an existing correlation id (e.g. from an inbound request)
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline relative to now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

/// Context handed to a handler for one delivery
#[derive(Debug, Clone)]
pub struct HandlerContext {
    message_id: Uuid,
    correlation_id: Uuid,
    topic: String,
    handler_name: String,
    published_at: DateTime<Utc>,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
    metadata: HashMap<String, String>,
}

impl HandlerContext {
    /// Derive a handler context from the publish-time context.
    ///
    /// `handler_timeout` tightens the deadline; it never extends one the
    /// producer already set. The cancellation token is a child of the
    /// producer's token, so cancelling it here does not cancel the producer.
    pub(crate) fn derive(
        source: &EventContext,
        message_id: Uuid,
        correlation_id: Uuid,
        topic: &str,
        handler_name: &str,
        published_at: DateTime<Utc>,
        handler_timeout: Option<Duration>,
    ) -> Self {
        let timeout_deadline = handler_timeout.map(|timeout| Instant::now() + timeout);
        let deadline = match (source.deadline, timeout_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let cancellation = source
            .cancellation
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();

        Self {
            message_id,
            correlation_id,
            topic: topic.to_string(),
            handler_name: handler_name.to_string(),
            published_at,
            deadline,
            cancellation,
            metadata: source.metadata.clone(),
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when no deadline applies
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the producer cancels this delivery
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    #[cfg(test)]
    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
