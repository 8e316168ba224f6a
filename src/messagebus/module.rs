//! # Message Bus Module
//!
//! Lifecycle wiring for applications: collect handlers, start the bus on a
//! background task, hand a narrow [`Publisher`] to request-handling code and
//! stop everything through one [`MessageBusHandle`].

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::handler::Handler;
use super::in_memory::InMemoryMessageBus;
use super::stats::BusStatistics;
use super::{BusState, Publisher, Subscriber};
use crate::config::MessageBusConfig;
use crate::error::{MessageBusError, Result};

/// Builder collecting the handlers a bus should start with
pub struct MessageBusModule {
    config: MessageBusConfig,
    handlers: Vec<Arc<dyn Handler>>,
}

impl MessageBusModule {
    pub fn new(config: MessageBusConfig) -> Self {
        Self {
            config,
            handlers: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_handlers(mut self, handlers: impl IntoIterator<Item = Arc<dyn Handler>>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Build a bus with every collected handler subscribed, still in `new`
    pub fn build(self) -> Result<InMemoryMessageBus> {
        let bus = InMemoryMessageBus::new(self.config)?;
        for handler in self.handlers {
            bus.subscribe(handler)?;
        }
        Ok(bus)
    }

    /// Build the bus and start its dispatch loop on a background task.
    ///
    /// Must be called inside a tokio runtime. The bus is `running` when this
    /// returns.
    pub fn start(self) -> Result<MessageBusHandle> {
        let bus = self.build()?;
        let shutdown = CancellationToken::new();
        let dispatch = bus.start(shutdown.clone())?;

        let join = tokio::spawn(async move {
            let result = dispatch.run().await;
            if let Err(ref e) = result {
                error!(error = %e, "❌ MESSAGEBUS: Dispatch loop exited with error");
            }
            result
        });

        let stats = bus.statistics();
        info!(
            topic_count = stats.topic_count,
            handler_count = stats.handler_count,
            "🚀 MESSAGEBUS: Message bus started"
        );

        Ok(MessageBusHandle {
            bus,
            shutdown,
            join: Some(join),
        })
    }
}

/// Handle to a started bus
pub struct MessageBusHandle {
    bus: InMemoryMessageBus,
    shutdown: CancellationToken,
    join: Option<JoinHandle<Result<()>>>,
}

impl MessageBusHandle {
    /// Producer-facing view of the bus. Cannot register handlers.
    pub fn publisher(&self) -> Arc<dyn Publisher> {
        Arc::new(self.bus.clone())
    }

    pub fn bus(&self) -> &InMemoryMessageBus {
        &self.bus
    }

    pub fn state(&self) -> BusState {
        self.bus.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == BusState::Running
    }

    pub fn statistics(&self) -> BusStatistics {
        self.bus.statistics()
    }

    /// Token that stops the dispatch loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Close the bus, drain in-flight deliveries and join the dispatch task
    pub async fn stop(mut self) -> Result<()> {
        info!("🛑 MESSAGEBUS: Shutdown requested");
        self.bus.close().await?;

        if let Some(join) = self.join.take() {
            join.await.map_err(|e| {
                MessageBusError::transport("*", format!("dispatch task failed: {e}"))
            })??;
        }

        let stats = self.bus.statistics();
        info!(
            events_published = stats.events_published,
            handler_invocations = stats.handler_invocations,
            handler_failures = stats.handler_failures(),
            "✅ MESSAGEBUS: Message bus stopped"
        );
        Ok(())
    }
}

impl Drop for MessageBusHandle {
    fn drop(&mut self) {
        // stop() was never called: let the loop drain in the background
        if self.join.is_some() {
            self.shutdown.cancel();
        }
    }
}
