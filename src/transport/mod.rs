//! Pub/sub transport abstraction
//!
//! The pipeline only talks to the broker through these traits:
//!
//! - [`Connector`] opens one [`Transport`] per process identity
//! - [`Transport`] publishes (waiting for the broker acknowledgement) and
//!   registers [`MessageHandler`]s for topic filters
//!
//! Handlers may be invoked concurrently, on transport-owned tasks, with each
//! other and with publishes issued from the same process. Implementations
//! must therefore be `Send + Sync` and safe to share behind an `Arc`.
//!
//! ## Implementations
//!
//! - [`mqtt::MqttConnector`]: MQTT broker via `rumqttc`
//! - [`memory::MemoryBroker`]: in-process broker for tests and dry runs

pub mod memory;
pub mod mqtt;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::TransportError;

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "u8")]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("invalid QoS level {other}, expected 0, 1 or 2")),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        };
        write!(f, "{level}")
    }
}

/// An inbound message delivered to a subscription handler
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Callback for messages matching a subscription
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message);
}

/// A connected pub/sub client owned by exactly one process identity
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity the connection was opened with
    fn identity(&self) -> &str;

    /// Publish a payload, returning once the broker acknowledged it
    /// according to `qos`.
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Register `handler` for every message matching `filter`.
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError>;

    /// Gracefully close the connection within a bounded time.
    async fn disconnect(&self);
}

/// Factory for transports, one connection per identity
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, identity: &str) -> Result<Arc<dyn Transport>, TransportError>;
}
