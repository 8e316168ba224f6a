use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::HandlerError;
use crate::events::{UserCreatedEvent, TOPIC_USER_CREATED};
use crate::messagebus::{decode_payload, Handler, HandlerContext};

/// Logs every `user.created` event it receives
#[derive(Debug, Default)]
pub struct UserCreatedHandler {
    received: AtomicU64,
}

impl UserCreatedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events decoded successfully so far
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Handler for UserCreatedHandler {
    fn topic(&self) -> &str {
        TOPIC_USER_CREATED
    }

    async fn handle(&self, ctx: &HandlerContext, payload: &[u8]) -> Result<(), HandlerError> {
        let event: UserCreatedEvent = decode_payload(payload).inspect_err(|e| {
            error!(
                correlation_id = %ctx.correlation_id(),
                error = %e,
                "Failed to decode UserCreatedEvent"
            );
        })?;

        self.received.fetch_add(1, Ordering::Relaxed);
        info!(
            user_id = %event.user_id,
            name = %event.name,
            email = %event.email,
            correlation_id = %ctx.correlation_id(),
            "Received UserCreatedEvent"
        );
        Ok(())
    }
}
