//! # In-Process Message Bus
//!
//! Topic-addressed publish/subscribe for decoupling request-handling code
//! from downstream consumers inside one process.
//!
//! ## Architecture
//!
//! ```text
//! Producers                       InMemoryMessageBus                    Consumers
//!
//! publish(ctx, &event) ──┐
//!                        ├──► [ingress queue] ──► dispatch loop ──┬──► handler_user.created_0
//! publish(ctx, &event) ──┘      (bounded FIFO)    (one task)      ├──► handler_user.created_1
//!                                                                 └──► handler_order.placed_2
//!                                                  one isolated task per (envelope, handler)
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! new ──subscribe()*──► new ──start()──► running ──close() / cancel──► closed
//! ```
//!
//! - Handlers are registered only while `new`; the registry is frozen at start.
//! - `publish` never waits for handlers, only for room in the ingress queue.
//! - Handler errors and panics are logged and counted, never propagated to
//!   producers, and never stop delivery to other handlers.
//! - Shutdown drains: queued envelopes are dispatched and in-flight handler
//!   invocations are awaited (bounded by `drain_timeout_ms`).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use messagebus_core::config::MessageBusConfig;
//! use messagebus_core::events::UserCreatedEvent;
//! use messagebus_core::handlers::UserCreatedHandler;
//! use messagebus_core::messagebus::{EventContext, MessageBusModule, PublisherExt};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = MessageBusModule::new(MessageBusConfig::default())
//!     .with_handler(Arc::new(UserCreatedHandler::new()))
//!     .start()?;
//!
//! let publisher = handle.publisher();
//! let event = UserCreatedEvent::new(uuid::Uuid::new_v4(), "Ann", "ann@example.com");
//! publisher.publish(EventContext::new(), &event).await?;
//!
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory;
pub mod module;
pub mod registry;
pub mod stats;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{MessageBusError, Result};

pub use context::{EventContext, HandlerContext};
pub use envelope::Envelope;
pub use event::Event;
pub use handler::{decode_payload, Handler, HandlerFn};
pub use in_memory::{DispatchLoop, InMemoryMessageBus};
pub use module::{MessageBusHandle, MessageBusModule};
pub use registry::{HandlerId, HandlerRegistration, TopicRegistry};
pub use stats::BusStatistics;

/// Lifecycle state of a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusState {
    New,
    Running,
    Closed,
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusState::New => write!(f, "new"),
            BusState::Running => write!(f, "running"),
            BusState::Closed => write!(f, "closed"),
        }
    }
}

/// Producer-facing side of the bus.
///
/// Narrower than [`MessageBus`]: code holding a `Publisher`
/// can emit events but cannot register handlers.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish an already-encoded payload to `topic`, returning the message id.
    async fn publish_raw(&self, ctx: EventContext, topic: &str, payload: Vec<u8>)
        -> Result<Uuid>;

    /// Close the bus. Calling this more than once is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Typed publishing on top of [`Publisher::publish_raw`]
#[async_trait]
pub trait PublisherExt: Publisher {
    /// Encode `event` as JSON and publish it to `event.topic()`.
    async fn publish<E>(&self, ctx: EventContext, event: &E) -> Result<Uuid>
    where
        E: Event,
    {
        let topic = event.topic();
        let payload = serde_json::to_vec(event).map_err(|source| MessageBusError::Encoding {
            topic: topic.to_string(),
            source,
        })?;
        self.publish_raw(ctx, topic, payload).await
    }
}

impl<P: Publisher + ?Sized> PublisherExt for P {}

/// Subscription side of the bus.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Register `handler` for its topic. Only valid before the bus starts.
    fn subscribe(&self, handler: Arc<dyn Handler>) -> Result<HandlerId>;

    /// Start dispatching and run until `shutdown` fires or the bus is closed.
    async fn run(&self, shutdown: CancellationToken) -> Result<()>;
}

/// Full bus surface, owned by the lifecycle controller.
pub trait MessageBus: Publisher + Subscriber {}

impl<T: Publisher + Subscriber> MessageBus for T {}
