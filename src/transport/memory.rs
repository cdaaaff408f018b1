//! In-process broker
//!
//! Implements the transport traits without a network: publishes are recorded
//! in a log and fanned out to matching subscriptions, each delivery on its own
//! task so handlers see the same concurrency they would behind a real broker.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::trace;

use super::{Connector, Message, MessageHandler, QoS, Transport};
use crate::error::TransportError;
use crate::wire::topic_matches;

/// A message as it was handed to the broker
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub identity: String,
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or_default()
    }
}

struct Subscription {
    filter: String,
    handler: Arc<dyn MessageHandler>,
}

#[derive(Default)]
struct BrokerState {
    subscriptions: RwLock<Vec<Subscription>>,
    published: Mutex<Vec<PublishedMessage>>,
}

/// Shared in-process broker; clones refer to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far, in publish order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state
            .published
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Messages published to topics matching `filter`
    pub fn published_to(&self, filter: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| topic_matches(filter, &m.topic))
            .collect()
    }

    /// Open a client on this broker.
    pub fn client(&self, identity: &str) -> MemoryTransport {
        MemoryTransport {
            identity: identity.to_string(),
            broker: self.clone(),
        }
    }

    fn deliver(&self, message: PublishedMessage) {
        let handlers = self
            .state
            .subscriptions
            .read()
            .map(|subs| {
                subs.iter()
                    .filter(|s| topic_matches(&s.filter, &message.topic))
                    .map(|s| s.handler.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        trace!(
            "delivering {} to {} subscription(s)",
            message.topic,
            handlers.len()
        );

        if let Ok(mut log) = self.state.published.lock() {
            log.push(message.clone());
        }

        for handler in handlers {
            let inbound = Message {
                topic: message.topic.clone(),
                payload: message.payload.clone(),
            };
            tokio::spawn(async move { handler.handle(inbound).await });
        }
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, identity: &str) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(self.client(identity)))
    }
}

/// A client connected to a [`MemoryBroker`]
pub struct MemoryTransport {
    identity: String,
    broker: MemoryBroker,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.broker.deliver(PublishedMessage {
            identity: self.identity.clone(),
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        _qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError> {
        let mut subs = self
            .broker
            .state
            .subscriptions
            .write()
            .map_err(|_| TransportError::Subscribe {
                filter: filter.to_string(),
                reason: "subscription table poisoned".to_string(),
            })?;

        subs.push(Subscription {
            filter: filter.to_string(),
            handler,
        });
        Ok(())
    }

    async fn disconnect(&self) {
        trace!("{} disconnected from memory broker", self.identity);
    }
}
