//! # In-Memory Message Bus
//!
//! Single-process broker backed by a bounded tokio mpsc queue.
//!
//! ## Dispatch
//!
//! ```text
//! publish_raw ──► [mpsc ingress] ──► DispatchLoop::run
//!                                        │ lookup topic in frozen registry
//!                                        │ acquire delivery permit (semaphore)
//!                                        └──► tracker.spawn(deliver) per handler
//!                                                 ├─ catch_unwind (panic isolation)
//!                                                 ├─ publish-time deadline / cancellation
//!                                                 └─ outcome logged + counted
//! ```
//!
//! ## Shutdown
//!
//! `close()` or cancelling the run token marks the bus `closed`, closes the
//! ingress queue to new sends, dispatches envelopes that were already
//! accepted, then waits for in-flight invocations. A fan-out blocked on a
//! delivery permit is interrupted by the close and finished inside the drain.
//! The whole drain is bounded by `drain_timeout_ms`; invocations still running
//! after that are abandoned and their handler futures dropped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::{EventContext, HandlerContext};
use super::envelope::Envelope;
use super::handler::Handler;
use super::registry::{ensure_routable, HandlerId, HandlerRegistration, TopicRegistry};
use super::stats::{BusMetrics, BusStatistics, DeliveryOutcome};
use super::{BusState, Publisher, Subscriber};
use crate::config::MessageBusConfig;
use crate::error::{MessageBusError, Result};

/// In-process message bus. Cheap to clone; clones share one broker.
#[derive(Clone)]
pub struct InMemoryMessageBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    config: MessageBusConfig,
    lifecycle: Mutex<Lifecycle>,
    metrics: BusMetrics,
    /// Fired by `close()` to stop a running dispatch loop
    close_signal: CancellationToken,
    /// Fired when the drain times out; stops invocations still running
    abandon: CancellationToken,
    /// Flips to true once the bus has fully released its resources
    finished: watch::Sender<bool>,
}

struct Lifecycle {
    state: BusState,
    /// Mutable registry, only populated while `new`
    registry: TopicRegistry,
    /// Registry handed to the dispatch loop at start
    frozen: Option<Arc<TopicRegistry>>,
    sender: Option<mpsc::Sender<Envelope>>,
    receiver: Option<mpsc::Receiver<Envelope>>,
}

impl std::fmt::Debug for InMemoryMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMessageBus")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl InMemoryMessageBus {
    /// Create a bus in the `new` state with an empty registry
    pub fn new(config: MessageBusConfig) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.buffer_size);
        let (finished, _) = watch::channel(false);

        info!(
            buffer_size = config.buffer_size,
            max_concurrent_deliveries = config.max_concurrent_deliveries,
            "Creating in-memory message bus"
        );

        Ok(Self {
            inner: Arc::new(BusInner {
                config,
                lifecycle: Mutex::new(Lifecycle {
                    state: BusState::New,
                    registry: TopicRegistry::new(),
                    frozen: None,
                    sender: Some(sender),
                    receiver: Some(receiver),
                }),
                metrics: BusMetrics::default(),
                close_signal: CancellationToken::new(),
                abandon: CancellationToken::new(),
                finished,
            }),
        })
    }

    pub fn state(&self) -> BusState {
        self.inner.lifecycle.lock().state
    }

    pub fn config(&self) -> &MessageBusConfig {
        &self.inner.config
    }

    pub fn statistics(&self) -> BusStatistics {
        let lifecycle = self.inner.lifecycle.lock();
        let registry = lifecycle.frozen.as_deref().unwrap_or(&lifecycle.registry);
        self.inner.metrics.snapshot(
            lifecycle.state,
            registry.topic_count(),
            registry.handler_count(),
        )
    }

    /// Transition `new → running` and hand back the dispatch loop.
    ///
    /// The transition happens before this returns, so no subscription can
    /// slip in after it even if the loop itself is spawned later.
    pub fn start(&self, shutdown: CancellationToken) -> Result<DispatchLoop> {
        let mut lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state {
            BusState::New => {}
            BusState::Running => {
                return Err(MessageBusError::AlreadyRunning {
                    state: BusState::Running,
                })
            }
            BusState::Closed => return Err(MessageBusError::BrokerClosed),
        }

        let receiver = lifecycle
            .receiver
            .take()
            .ok_or(MessageBusError::BrokerClosed)?;
        let registry = Arc::new(std::mem::take(&mut lifecycle.registry));
        lifecycle.frozen = Some(Arc::clone(&registry));
        lifecycle.state = BusState::Running;
        drop(lifecycle);

        info!(
            topic_count = registry.topic_count(),
            handler_count = registry.handler_count(),
            "Starting message bus dispatch loop"
        );

        Ok(DispatchLoop {
            inner: Arc::clone(&self.inner),
            registry,
            receiver,
            shutdown,
        })
    }

    async fn wait_finished(&self) {
        let mut finished = self.inner.finished.subscribe();
        // the sender lives as long as `inner`, so this only returns once finished
        let _ = finished.wait_for(|done| *done).await;
    }
}

#[async_trait]
impl Publisher for InMemoryMessageBus {
    async fn publish_raw(
        &self,
        ctx: EventContext,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<Uuid> {
        ensure_routable(topic)?;

        let sender = {
            let lifecycle = self.inner.lifecycle.lock();
            match (&lifecycle.state, &lifecycle.sender) {
                (BusState::Closed, _) | (_, None) => return Err(MessageBusError::BrokerClosed),
                (_, Some(sender)) => sender.clone(),
            }
        };

        let envelope = Envelope::new(topic, payload, ctx);
        let message_id = envelope.id;
        let correlation_id = envelope.correlation_id;
        let publish_timeout = self.inner.config.publish_timeout();

        match tokio::time::timeout(publish_timeout, sender.send(envelope)).await {
            Ok(Ok(())) => {
                self.inner.metrics.record_published();
                debug!(
                    topic = %topic,
                    message_id = %message_id,
                    correlation_id = %correlation_id,
                    "Published event"
                );
                Ok(message_id)
            }
            Ok(Err(_)) => Err(MessageBusError::BrokerClosed),
            Err(_) => {
                warn!(
                    topic = %topic,
                    message_id = %message_id,
                    timeout_ms = publish_timeout.as_millis() as u64,
                    "Ingress buffer stayed full - rejecting publish"
                );
                Err(MessageBusError::transport(
                    topic,
                    format!(
                        "ingress buffer full after waiting {}ms",
                        publish_timeout.as_millis()
                    ),
                ))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let previous = {
            let mut lifecycle = self.inner.lifecycle.lock();
            let previous = lifecycle.state;
            lifecycle.state = BusState::Closed;
            lifecycle.sender = None;
            if previous == BusState::New {
                if let Some(receiver) = lifecycle.receiver.take() {
                    if !receiver.is_empty() {
                        warn!(
                            dropped = receiver.len(),
                            "Closing message bus before start - dropping queued events"
                        );
                    }
                }
            }
            previous
        };

        match previous {
            BusState::New => {
                self.inner.finished.send_replace(true);
                info!("Message bus closed before start");
            }
            BusState::Running => {
                info!("Closing message bus - draining in-flight deliveries");
                self.inner.close_signal.cancel();
            }
            BusState::Closed => debug!("Message bus already closed"),
        }

        self.wait_finished().await;
        Ok(())
    }
}

#[async_trait]
impl Subscriber for InMemoryMessageBus {
    fn subscribe(&self, handler: Arc<dyn Handler>) -> Result<HandlerId> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state != BusState::New {
            return Err(MessageBusError::AlreadyRunning {
                state: lifecycle.state,
            });
        }

        let topic = handler.topic().to_string();
        let id = lifecycle.registry.register(handler)?;
        debug!(topic = %topic, handler = %id, "Subscribed handler");
        Ok(id)
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.start(shutdown)?.run().await
    }
}

enum LoopSignal {
    Envelope(Envelope),
    Cancelled,
    Closed,
    Disconnected,
}

/// Handlers of an envelope not yet spawned when shutdown interrupted its fan-out
struct PendingDispatch {
    envelope: Arc<Envelope>,
    next: usize,
}

/// The running half of a started bus.
///
/// Obtained from [`InMemoryMessageBus::start`]; [`run`](Self::run) pumps
/// envelopes until the bus is closed or the shutdown token fires.
pub struct DispatchLoop {
    inner: Arc<BusInner>,
    registry: Arc<TopicRegistry>,
    receiver: mpsc::Receiver<Envelope>,
    shutdown: CancellationToken,
}

impl DispatchLoop {
    pub async fn run(mut self) -> Result<()> {
        let tracker = TaskTracker::new();
        let permits = Arc::new(Semaphore::new(self.inner.config.max_concurrent_deliveries));
        let mut pending = None;

        let reason = loop {
            let signal = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => LoopSignal::Cancelled,
                _ = self.inner.close_signal.cancelled() => LoopSignal::Closed,
                next = self.receiver.recv() => match next {
                    Some(envelope) => LoopSignal::Envelope(envelope),
                    None => LoopSignal::Disconnected,
                },
            };

            match signal {
                LoopSignal::Envelope(envelope) => {
                    pending = self.dispatch(envelope, &tracker, &permits, true).await;
                    if pending.is_some() {
                        break if self.shutdown.is_cancelled() {
                            "run token cancelled"
                        } else {
                            "close requested"
                        };
                    }
                }
                LoopSignal::Cancelled => break "run token cancelled",
                LoopSignal::Closed => break "close requested",
                LoopSignal::Disconnected => break "ingress queue disconnected",
            }
        };

        self.drain(tracker, permits, pending, reason).await;
        Ok(())
    }

    async fn dispatch(
        &self,
        envelope: Envelope,
        tracker: &TaskTracker,
        permits: &Arc<Semaphore>,
        interruptible: bool,
    ) -> Option<PendingDispatch> {
        let handlers = self.registry.handlers_for(&envelope.topic).len();
        self.inner.metrics.record_dispatched(handlers);

        if handlers == 0 {
            debug!(
                topic = %envelope.topic,
                message_id = %envelope.id,
                "No handlers registered for topic - event discarded"
            );
            return None;
        }

        self.fan_out(Arc::new(envelope), 0, tracker, permits, interruptible)
            .await
    }

    /// Spawn one delivery per handler from `from` on, in registration order.
    ///
    /// When `interruptible`, waiting for a permit gives way to close or the run
    /// token and the unspawned remainder is returned.
    async fn fan_out(
        &self,
        envelope: Arc<Envelope>,
        from: usize,
        tracker: &TaskTracker,
        permits: &Arc<Semaphore>,
        interruptible: bool,
    ) -> Option<PendingDispatch> {
        let handlers = self.registry.handlers_for(&envelope.topic);

        for (index, registration) in handlers.iter().enumerate().skip(from) {
            let acquired = if interruptible {
                tokio::select! {
                    biased;
                    permit = Arc::clone(permits).acquire_owned() => permit.ok(),
                    _ = self.shutdown.cancelled() => None,
                    _ = self.inner.close_signal.cancelled() => None,
                }
            } else {
                Arc::clone(permits).acquire_owned().await.ok()
            };
            let Some(permit) = acquired else {
                return interruptible.then(|| PendingDispatch {
                    envelope: Arc::clone(&envelope),
                    next: index,
                });
            };
            self.inner.metrics.delivery_started();

            let inner = Arc::clone(&self.inner);
            let registration = registration.clone();
            let envelope = Arc::clone(&envelope);
            tracker.spawn(async move {
                let outcome = deliver(&inner, &registration, &envelope).await;
                inner.metrics.delivery_finished(outcome);
                drop(permit);
            });
        }
        None
    }

    async fn drain(
        &mut self,
        tracker: TaskTracker,
        permits: Arc<Semaphore>,
        pending: Option<PendingDispatch>,
        reason: &str,
    ) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.state = BusState::Closed;
            lifecycle.sender = None;
        }
        self.receiver.close();

        info!(
            reason = %reason,
            queued = self.receiver.len(),
            in_flight = self.inner.metrics.in_flight(),
            "Message bus stopping - draining"
        );

        let drain_timeout = self.inner.config.drain_timeout();
        let drained = tokio::time::timeout(drain_timeout, async {
            if let Some(pending) = pending {
                self.fan_out(pending.envelope, pending.next, &tracker, &permits, false)
                    .await;
            }
            while let Some(envelope) = self.receiver.recv().await {
                self.dispatch(envelope, &tracker, &permits, false).await;
            }
            tracker.close();
            tracker.wait().await;
        })
        .await;

        if drained.is_err() {
            warn!(
                drain_timeout_ms = drain_timeout.as_millis() as u64,
                abandoned = self.inner.metrics.in_flight(),
                "Drain timeout elapsed - abandoning in-flight handler invocations"
            );
            self.inner.abandon.cancel();
        }

        self.inner.finished.send_replace(true);
        info!("Message bus stopped");
    }
}

impl Drop for DispatchLoop {
    fn drop(&mut self) {
        let finished = *self.inner.finished.borrow();
        if !finished {
            {
                let mut lifecycle = self.inner.lifecycle.lock();
                lifecycle.state = BusState::Closed;
                lifecycle.sender = None;
            }
            self.inner.abandon.cancel();
            self.inner.finished.send_replace(true);
            warn!("Dispatch loop dropped before shutdown completed - bus closed");
        }
    }
}

/// Invoke one handler for one envelope, isolating errors and panics
async fn deliver(
    inner: &BusInner,
    registration: &HandlerRegistration,
    envelope: &Envelope,
) -> DeliveryOutcome {
    let config = &inner.config;
    let ctx = HandlerContext::derive(
        &envelope.context,
        envelope.id,
        envelope.correlation_id,
        &envelope.topic,
        registration.id.as_str(),
        envelope.published_at,
        config.handler_timeout(),
    );

    let expired = ctx.deadline().is_some_and(|deadline| deadline <= Instant::now());
    if ctx.is_cancelled() || expired {
        warn!(
            topic = %envelope.topic,
            handler = %registration.id,
            message_id = %envelope.id,
            correlation_id = %envelope.correlation_id,
            "Skipping delivery - publish context already cancelled or expired"
        );
        return DeliveryOutcome::Abandoned;
    }

    let started = std::time::Instant::now();
    let deadline = ctx.deadline();
    let invocation =
        AssertUnwindSafe(registration.handler.handle(&ctx, &envelope.payload[..])).catch_unwind();
    let deadline_reached = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };

    let result = tokio::select! {
        biased;
        result = invocation => Ok(result),
        _ = ctx.cancelled() => Err("cancelled by producer"),
        _ = deadline_reached => Err("deadline exceeded"),
        _ = inner.abandon.cancelled() => Err("abandoned at shutdown"),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(Ok(()))) => {
            debug!(
                topic = %envelope.topic,
                handler = %registration.id,
                message_id = %envelope.id,
                elapsed_ms = elapsed_ms,
                "Handler completed"
            );
            DeliveryOutcome::Succeeded
        }
        Ok(Ok(Err(handler_error))) => {
            if config.log_handler_errors {
                error!(
                    topic = %envelope.topic,
                    handler = %registration.id,
                    message_id = %envelope.id,
                    correlation_id = %envelope.correlation_id,
                    error = %handler_error,
                    elapsed_ms = elapsed_ms,
                    "Handler returned error"
                );
            }
            DeliveryOutcome::Failed
        }
        Ok(Err(panic_error)) => {
            let panic_msg = if let Some(s) = panic_error.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_error.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            error!(
                topic = %envelope.topic,
                handler = %registration.id,
                message_id = %envelope.id,
                correlation_id = %envelope.correlation_id,
                panic_msg = %panic_msg,
                "Handler panicked"
            );
            DeliveryOutcome::Panicked
        }
        Err(reason) => {
            warn!(
                topic = %envelope.topic,
                handler = %registration.id,
                message_id = %envelope.id,
                correlation_id = %envelope.correlation_id,
                reason = reason,
                elapsed_ms = elapsed_ms,
                "Handler invocation abandoned"
            );
            DeliveryOutcome::Abandoned
        }
    }
}
