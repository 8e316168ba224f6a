use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use messagebus_core::messagebus::{Handler, HandlerContext};
use messagebus_core::HandlerError;

use super::DELIVERY_TIMEOUT;

/// One observed handler invocation
#[derive(Debug, Clone)]
pub struct Delivery {
    pub handler: String,
    pub topic: String,
    pub payload: Vec<u8>,
    pub message_id: Uuid,
    pub correlation_id: Uuid,
}

pub type DeliveryReceiver = UnboundedReceiver<Delivery>;

pub fn delivery_channel() -> (UnboundedSender<Delivery>, DeliveryReceiver) {
    unbounded_channel()
}

/// Forwards every invocation to a channel
pub struct RecordingHandler {
    label: String,
    topic: String,
    tx: UnboundedSender<Delivery>,
}

impl RecordingHandler {
    pub fn new(label: &str, topic: &str, tx: UnboundedSender<Delivery>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            topic: topic.to_string(),
            tx,
        })
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn handle(&self, ctx: &HandlerContext, payload: &[u8]) -> Result<(), HandlerError> {
        let _ = self.tx.send(Delivery {
            handler: self.label.clone(),
            topic: ctx.topic().to_string(),
            payload: payload.to_vec(),
            message_id: ctx.message_id(),
            correlation_id: ctx.correlation_id(),
        });
        Ok(())
    }
}

/// Always returns an error
pub struct FailingHandler {
    topic: String,
}

impl FailingHandler {
    pub fn new(topic: &str) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl Handler for FailingHandler {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn handle(&self, _ctx: &HandlerContext, _payload: &[u8]) -> Result<(), HandlerError> {
        Err(HandlerError::failed("downstream unavailable"))
    }
}

/// Panics on every invocation
pub struct PanickingHandler {
    topic: String,
}

impl PanickingHandler {
    pub fn new(topic: &str) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl Handler for PanickingHandler {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn handle(&self, ctx: &HandlerContext, _payload: &[u8]) -> Result<(), HandlerError> {
        panic!("handler for {} blew up", ctx.topic());
    }
}

/// Receive exactly `count` deliveries, failing the test on timeout
pub async fn collect(rx: &mut DeliveryReceiver, count: usize) -> Vec<Delivery> {
    let mut deliveries = Vec::with_capacity(count);
    for _ in 0..count {
        let delivery = tokio::time::timeout(DELIVERY_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("delivery channel closed");
        deliveries.push(delivery);
    }
    deliveries
}
