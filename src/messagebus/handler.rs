//! Handler contract and adapters.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::context::HandlerContext;
use crate::error::HandlerError;

/// A consumer bound to exactly one topic.
///
/// `handle` may be invoked concurrently, including overlapping calls on the
/// same handler for different events. Implementations that need one call at
/// a time must serialize internally.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Topic this handler consumes. Must not change after construction.
    fn topic(&self) -> &str;

    /// Process one encoded payload.
    async fn handle(&self, ctx: &HandlerContext, payload: &[u8]) -> Result<(), HandlerError>;
}

/// Decode a JSON payload into the event shape a handler expects.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, HandlerError> {
    Ok(serde_json::from_slice(payload)?)
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;
type HandlerCallback = Arc<dyn Fn(HandlerContext, Arc<[u8]>) -> HandlerFuture + Send + Sync>;

/// Closure-backed [`Handler`]
///
/// ```rust
/// use messagebus_core::messagebus::HandlerFn;
///
/// let handler = HandlerFn::new("user.created", |_ctx, payload| async move {
///     println!("received {} bytes", payload.len());
///     Ok::<(), messagebus_core::HandlerError>(())
/// });
/// ```
#[derive(Clone)]
pub struct HandlerFn {
    topic: String,
    callback: HandlerCallback,
}

impl HandlerFn {
    pub fn new<F, Fut>(topic: impl Into<String>, f: F) -> Self
    where
        F: Fn(HandlerContext, Arc<[u8]>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            topic: topic.into(),
            callback: Arc::new(move |ctx, payload| Box::pin(f(ctx, payload))),
        }
    }
}

impl fmt::Debug for HandlerFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn")
            .field("topic", &self.topic)
            .finish()
    }
}

#[async_trait]
impl Handler for HandlerFn {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn handle(&self, ctx: &HandlerContext, payload: &[u8]) -> Result<(), HandlerError> {
        (self.callback)(ctx.clone(), Arc::from(payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messagebus::context::EventContext;
    use chrono::Utc;
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Greeting {
        name: String,
    }

    fn test_context() -> HandlerContext {
        HandlerContext::derive(
            &EventContext::new(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "greeting.sent",
            "handler_greeting.sent_0",
            Utc::now(),
            None,
        )
    }

    #[test]
    fn test_decode_payload() {
        let greeting: Greeting = decode_payload(br#"{"name":"Ann"}"#).unwrap();
        assert_eq!(
            greeting,
            Greeting {
                name: "Ann".to_string()
            }
        );

        let err = decode_payload::<Greeting>(b"not json").unwrap_err();
        assert!(matches!(err, HandlerError::Decode(_)));
    }

    #[tokio::test]
    async fn test_handler_fn_invokes_closure() {
        let handler = HandlerFn::new("greeting.sent", |ctx, payload| async move {
            let greeting: Greeting = decode_payload(&payload)?;
            if greeting.name.is_empty() {
                return Err(HandlerError::failed(format!(
                    "empty name on {}",
                    ctx.topic()
                )));
            }
            Ok::<(), HandlerError>(())
        });

        assert_eq!(handler.topic(), "greeting.sent");
        let ctx = test_context();
        assert!(handler.handle(&ctx, br#"{"name":"Ann"}"#).await.is_ok());
        assert!(matches!(
            handler.handle(&ctx, br#"{"name":""}"#).await,
            Err(HandlerError::Failed(_))
        ));
    }
}
