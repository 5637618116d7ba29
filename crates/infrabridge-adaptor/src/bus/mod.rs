//! Service platform bus.
//!
//! - `MessageBus` trait: delivery of envelopes to and from the platform
//! - `InMemoryBus`: loopback bus for tests and for running without a broker
//! - `MqttBus`: broker-backed bus

pub mod mqtt;

use async_trait::async_trait;
use infrabridge_core::Message;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

pub use mqtt::MqttBus;

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Bus closed")]
    Closed,
}

/// Transport between the adaptor and the service platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Starts forwarding every inbound message to `ingress`.
    async fn subscribe(&self, ingress: mpsc::UnboundedSender<Message>) -> Result<()>;

    async fn publish(&self, message: Message) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

const OUTBOUND_CAPACITY: usize = 1024;

struct InMemoryInner {
    ingress: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    outbound: broadcast::Sender<Message>,
    published: Mutex<Vec<Message>>,
}

/// Loopback bus. Tests play the platform side through [`InMemoryBus::inject`]
/// and [`InMemoryBus::outbound`].
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<InMemoryInner>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);
        Self {
            inner: Arc::new(InMemoryInner {
                ingress: Mutex::new(None),
                outbound,
                published: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Delivers `message` to the subscribed adaptor as if the platform sent it.
    pub fn inject(&self, message: Message) -> Result<()> {
        let ingress = self
            .inner
            .ingress
            .lock()
            .map_err(|_| BusError::Publish("Lock poisoned".to_string()))?
            .clone()
            .ok_or(BusError::Closed)?;
        ingress.send(message).map_err(|_| BusError::Closed)
    }

    /// Stream of everything the adaptor publishes from now on.
    pub fn outbound(&self) -> broadcast::Receiver<Message> {
        self.inner.outbound.subscribe()
    }

    pub fn published(&self) -> Vec<Message> {
        self.inner
            .published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn subscribe(&self, ingress: mpsc::UnboundedSender<Message>) -> Result<()> {
        let mut slot = self
            .inner
            .ingress
            .lock()
            .map_err(|_| BusError::Subscribe("Lock poisoned".to_string()))?;
        *slot = Some(ingress);
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<()> {
        debug!(topic = %message.topic, sid = %message.sid, "Publishing on in-memory bus");
        self.inner
            .published
            .lock()
            .map_err(|_| BusError::Publish("Lock poisoned".to_string()))?
            .push(message.clone());
        // No receiver is fine: nobody on the platform side is listening.
        let _ = self.inner.outbound.send(message);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Ok(mut slot) = self.inner.ingress.lock() {
            slot.take();
        }
        Ok(())
    }
}
