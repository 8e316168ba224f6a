use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::context::EventContext;

/// Transport wrapper around one published event.
///
/// The payload is shared immutably between all handler invocations for the
/// envelope; each handler decodes its own copy.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub topic: String,
    pub payload: Arc<[u8]>,
    pub published_at: DateTime<Utc>,
    pub context: EventContext,
}

impl Envelope {
    /// Wrap an encoded payload. A correlation id is generated when the
    /// producer did not supply one.
    pub fn new(topic: impl Into<String>, payload: Vec<u8>, context: EventContext) -> Self {
        let correlation_id = context.correlation_id().unwrap_or_else(Uuid::new_v4);
        Self {
            id: Uuid::new_v4(),
            correlation_id,
            topic: topic.into(),
            payload: payload.into(),
            published_at: Utc::now(),
            context,
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}
