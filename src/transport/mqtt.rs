//! MQTT transport over `rumqttc`
//!
//! ## Event Loop
//!
//! `rumqttc` splits a connection into an [`AsyncClient`] (request side) and an
//! [`EventLoop`] that must be polled for anything to happen. Each connection
//! spawns one driver task polling the event loop, which:
//!
//! 1. Resolves publish acknowledgements (QoS 0: written, QoS 1: PUBACK,
//!    QoS 2: PUBCOMP)
//! 2. Dispatches inbound publishes to matching handlers on their own tasks
//! 3. Reconnects after transient errors and restores subscriptions
//!
//! ```text
//! publish() ──► AsyncClient ──► EventLoop ──► broker
//!     ▲                            │
//!     └──── ack (oneshot) ◄────────┤
//!                                  └──► handler tasks
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

use super::{Connector, Message, MessageHandler, QoS, Transport};
use crate::error::TransportError;
use crate::wire::topic_matches;

const DEFAULT_PORT: u16 = 1883;

const REQUEST_CAPACITY: usize = 64;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(250);

const QUEUE_RETRY_DELAY: Duration = Duration::from_millis(10);

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Split `tcp://host:port`, `mqtt://host:port` or `host:port` into host and
/// port. The port defaults to 1883.
pub fn parse_broker_address(address: &str) -> Result<(String, u16), String> {
    let stripped = address
        .strip_prefix("tcp://")
        .or_else(|| address.strip_prefix("mqtt://"))
        .unwrap_or(address)
        .trim_end_matches('/');

    if stripped.is_empty() {
        return Err(format!("empty broker address {address:?}"));
    }

    match stripped.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| format!("invalid port in {address:?}: {e}"))?;
            if host.is_empty() {
                return Err(format!("missing host in {address:?}"));
            }
            Ok((host.to_string(), port))
        }
        None => Ok((stripped.to_string(), DEFAULT_PORT)),
    }
}

/// Opens MQTT connections to one broker
#[derive(Debug, Clone)]
pub struct MqttConnector {
    address: String,
    connect_timeout: Duration,
    ack_timeout: Duration,
}

impl MqttConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    fn connection_error(&self, identity: &str, reason: impl Into<String>) -> TransportError {
        TransportError::Connection {
            address: self.address.clone(),
            identity: identity.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Connector for MqttConnector {
    #[instrument(skip(self), fields(broker = %self.address))]
    async fn connect(&self, identity: &str) -> Result<Arc<dyn Transport>, TransportError> {
        let (host, port) =
            parse_broker_address(&self.address).map_err(|e| self.connection_error(identity, e))?;

        let mut options = MqttOptions::new(identity, host, port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        match tokio::time::timeout(self.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(self.connection_error(identity, reason)),
            Err(_) => {
                return Err(self.connection_error(
                    identity,
                    format!("no CONNACK within {:?}", self.connect_timeout),
                ));
            }
        }

        info!("connected as {identity}");

        let shared = Arc::new(Shared::default());
        let driver = tokio::spawn(drive(eventloop, client.clone(), shared.clone()));

        Ok(Arc::new(MqttTransport {
            identity: identity.to_string(),
            client,
            shared,
            driver: Mutex::new(Some(driver)),
            ack_timeout: self.ack_timeout,
        }))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), String> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(format!("broker refused connection: {:?}", ack.code))
                };
            }
            Ok(event) => trace!("pre-connack event: {event:?}"),
            Err(e) => return Err(e.to_string()),
        }
    }
}

struct Waiter {
    qos: QoS,
    done: oneshot::Sender<()>,
}

/// Publishes waiting for their packet id, then for their acknowledgement
#[derive(Default)]
struct PendingAcks {
    queued: VecDeque<Waiter>,
    inflight: HashMap<u16, oneshot::Sender<()>>,
}

impl PendingAcks {
    fn sent(&mut self, pkid: u16) {
        // retransmission of a packet we already track
        if pkid != 0 && self.inflight.contains_key(&pkid) {
            return;
        }

        let Some(waiter) = self.queued.pop_front() else {
            return;
        };

        match waiter.qos {
            QoS::AtMostOnce => {
                let _ = waiter.done.send(());
            }
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                self.inflight.insert(pkid, waiter.done);
            }
        }
    }

    fn acknowledged(&mut self, pkid: u16) {
        if let Some(done) = self.inflight.remove(&pkid) {
            let _ = done.send(());
        }
    }
}

struct Subscription {
    filter: String,
    qos: QoS,
    handler: Arc<dyn MessageHandler>,
}

#[derive(Default)]
struct Shared {
    subscriptions: RwLock<Vec<Subscription>>,
    pending: Mutex<PendingAcks>,
    closing: AtomicBool,
}

impl Shared {
    fn with_pending<R>(&self, f: impl FnOnce(&mut PendingAcks) -> R) -> Option<R> {
        self.pending.lock().ok().map(|mut pending| f(&mut pending))
    }

    fn dispatch(&self, topic: String, payload: Vec<u8>) {
        let Ok(subs) = self.subscriptions.read() else {
            return;
        };

        for sub in subs.iter().filter(|s| topic_matches(&s.filter, &topic)) {
            let handler = sub.handler.clone();
            let message = Message {
                topic: topic.clone(),
                payload: payload.clone(),
            };
            tokio::spawn(async move { handler.handle(message).await });
        }
    }

    fn resubscribe(&self, client: &AsyncClient) {
        let Ok(subs) = self.subscriptions.read() else {
            return;
        };

        for sub in subs.iter() {
            if let Err(e) = client.try_subscribe(sub.filter.clone(), sub.qos.into()) {
                error!("failed to restore subscription {}: {e}", sub.filter);
            }
        }
    }
}

async fn drive(mut eventloop: EventLoop, client: AsyncClient, shared: Arc<Shared>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!("inbound publish on {}", publish.topic);
                shared.dispatch(publish.topic, publish.payload.to_vec());
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                shared.with_pending(|p| p.acknowledged(ack.pkid));
            }
            Ok(Event::Incoming(Packet::PubComp(comp))) => {
                shared.with_pending(|p| p.acknowledged(comp.pkid));
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                debug!("reconnected, restoring subscriptions");
                shared.resubscribe(&client);
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                shared.with_pending(|p| p.sent(pkid));
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("disconnect sent");
            }
            Ok(event) => trace!("event: {event:?}"),
            Err(e) => {
                if shared.closing.load(Ordering::SeqCst) {
                    break;
                }
                warn!("connection error: {e}, retrying in {RECONNECT_DELAY:?}");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }

    debug!("event loop stopped");
}

/// One MQTT connection
pub struct MqttTransport {
    identity: String,
    client: AsyncClient,
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
    ack_timeout: Duration,
}

impl MqttTransport {
    /// Hand the publish to the event loop and queue its waiter.
    ///
    /// Both happen under the pending lock without yielding in between, so the
    /// waiter queue always matches the order of outgoing publishes, even when
    /// the calling future is dropped.
    async fn enqueue(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &[u8],
        waiter: Waiter,
    ) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.ack_timeout;
        let mut waiter = Some(waiter);

        loop {
            if self.shared.closing.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }

            let queued = self
                .shared
                .with_pending(|pending| {
                    let sent = self
                        .client
                        .try_publish(topic, qos.into(), retain, payload.to_vec())
                        .is_ok();
                    if sent {
                        pending.queued.extend(waiter.take());
                    }
                    sent
                })
                .ok_or(TransportError::Closed)?;

            if queued {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(TransportError::Publish {
                    topic: topic.to_string(),
                    reason: "request queue stayed full".to_string(),
                });
            }
            tokio::time::sleep(QUEUE_RETRY_DELAY).await;
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn identity(&self) -> &str {
        &self.identity
    }

    #[instrument(skip(self, payload), fields(identity = %self.identity))]
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let (done, acked) = oneshot::channel();
        self.enqueue(topic, qos, retain, &payload, Waiter { qos, done })
            .await?;

        match tokio::time::timeout(self.ack_timeout, acked).await {
            Ok(Ok(())) => {
                trace!("publish to {topic} acknowledged");
                Ok(())
            }
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::AckTimeout {
                topic: topic.to_string(),
                timeout: self.ack_timeout,
            }),
        }
    }

    #[instrument(skip(self, handler), fields(identity = %self.identity))]
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError> {
        {
            let mut subs =
                self.shared
                    .subscriptions
                    .write()
                    .map_err(|_| TransportError::Subscribe {
                        filter: filter.to_string(),
                        reason: "subscription table poisoned".to_string(),
                    })?;
            subs.push(Subscription {
                filter: filter.to_string(),
                qos,
                handler,
            });
        }

        self.client
            .subscribe(filter, qos.into())
            .await
            .map_err(|e| TransportError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })?;

        info!("subscribed to {filter}");
        Ok(())
    }

    async fn disconnect(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);

        if let Err(e) = self.client.disconnect().await {
            warn!("failed to request disconnect: {e}");
        }

        let driver = self.driver.lock().ok().and_then(|mut d| d.take());
        if let Some(mut driver) = driver {
            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut driver)
                .await
                .is_err()
            {
                driver.abort();
            }
        }

        info!("{} disconnected from broker", self.identity);
    }
}
