use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ampere_core::topic;
use async_trait::async_trait;
use dashmap::DashMap;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{BusError, BusMessage, BusStats, MessageBus, SUBSCRIPTION_BUFFER, StatsRecorder};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Upper bound on waiting for a broker PUBACK.
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_publish_timeout_secs() -> u64 {
    5
}

fn default_request_capacity() -> usize {
    64
}

/// MQTT transport. Publishes use QoS 1 and resolve on the broker's PUBACK.
pub struct MqttBus {
    client: AsyncClient,
    shared: Arc<Shared>,
    publish_timeout: Duration,
    // Serializes "queue waiter, hand to client" so waiters line up with packet ids.
    publish_order: Mutex<()>,
}

struct Shared {
    connected: AtomicBool,
    queued: StdMutex<VecDeque<oneshot::Sender<()>>>,
    inflight: DashMap<u16, oneshot::Sender<()>>,
    subscriptions: StdMutex<Vec<(String, mpsc::Sender<BusMessage>)>>,
    stats: StatsRecorder,
}

impl Shared {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            queued: StdMutex::new(VecDeque::new()),
            inflight: DashMap::new(),
            subscriptions: StdMutex::new(Vec::new()),
            stats: StatsRecorder::default(),
        }
    }

    /// Pairs the oldest queued waiter with `pkid`. A retransmitted packet
    /// keeps the waiter it was first paired with.
    fn outgoing_publish(&self, pkid: u16) {
        if self.inflight.contains_key(&pkid) {
            debug!(pkid, "Publish retransmitted");
            return;
        }
        if let Some(waiter) = lock(&self.queued).pop_front() {
            self.inflight.insert(pkid, waiter);
        }
    }

    fn puback(&self, pkid: u16) {
        if let Some((_, waiter)) = self.inflight.remove(&pkid) {
            let _ = waiter.send(());
        }
    }

    /// Without a resumed session the client discards every unacked and
    /// queued publish, so their waiters are dropped and report it.
    fn session_started(&self, session_present: bool) {
        if !session_present {
            self.inflight.clear();
            lock(&self.queued).clear();
        }
    }
}

impl MqttBus {
    /// Creates the client and spawns its event loop. The loop reconnects on its
    /// own until `cancel` fires.
    pub fn connect(config: &MqttConfig, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);

        let shared = Arc::new(Shared::new());

        info!(host = %config.host, port = config.port, client_id = %config.client_id, "Connecting to MQTT broker");

        let handle = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            shared.clone(),
            cancel,
        ));

        let bus = Self {
            client,
            shared,
            publish_timeout: Duration::from_secs(config.publish_timeout_secs),
            publish_order: Mutex::new(()),
        };

        (bus, handle)
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if !self.is_connected() {
            self.shared.stats.record_failed();
            return Err(BusError::NotConnected);
        }

        let bytes = payload.len();
        let started = Instant::now();
        let (tx, rx) = oneshot::channel();

        {
            let _order = self.publish_order.lock().await;
            lock(&self.shared.queued).push_back(tx);

            if let Err(e) = self
                .client
                .publish(topic, QoS::AtLeastOnce, false, payload)
                .await
            {
                lock(&self.shared.queued).pop_back();
                self.shared.stats.record_failed();
                return Err(e.into());
            }
        }

        match tokio::time::timeout(self.publish_timeout, rx).await {
            Ok(Ok(())) => {
                self.shared.stats.record_published(bytes, started.elapsed());
                Ok(())
            }
            Ok(Err(dropped)) => {
                self.shared.stats.record_failed();
                Err(BusError::Dropped(dropped))
            }
            Err(_) => {
                self.shared.stats.record_failed();
                Err(BusError::Timeout(self.publish_timeout))
            }
        }
    }

    async fn subscribe(&self, filter: &str) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        lock(&self.shared.subscriptions).push((filter.to_owned(), tx));

        // Filters are (re)sent on every ConnAck, so only push now when live.
        if self.is_connected() {
            self.client.subscribe(filter, QoS::AtLeastOnce).await?;
        }

        debug!(filter, "Subscribed");
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn stats(&self) -> BusStats {
        self.shared.stats.snapshot()
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let mut backoff = Duration::from_secs(1);
    let mut was_connected = false;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                info!("MQTT event loop shutting down");
                let _ = client.try_disconnect();
                break;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                shared.session_started(connack.session_present);
                if was_connected {
                    shared.stats.record_reconnect();
                }
                was_connected = true;
                backoff = Duration::from_secs(1);
                shared.connected.store(true, Ordering::Release);
                info!("Connected to MQTT broker");

                for (filter, _) in lock(&shared.subscriptions).iter() {
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                        warn!(error = %e, filter = %filter, "Failed to resubscribe");
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => shared.outgoing_publish(pkid),
            Ok(Event::Incoming(Packet::PubAck(ack))) => shared.puback(ack.pkid),
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = BusMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                route(&shared, message);
            }
            Ok(_) => {}
            Err(e) => {
                // Waiters stay paired until the next ConnAck tells whether the
                // session, and with it the unacked publishes, survived.
                shared.connected.store(false, Ordering::Release);

                warn!(error = %e, backoff_secs = backoff.as_secs(), "MQTT connection error, will retry");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    shared.connected.store(false, Ordering::Release);
}

fn route(shared: &Shared, message: BusMessage) {
    let mut subscriptions = lock(&shared.subscriptions);
    subscriptions.retain(|(_, tx)| !tx.is_closed());

    for (filter, tx) in subscriptions.iter() {
        if !topic::matches(filter, &message.topic) {
            continue;
        }
        if let Err(e) = tx.try_send(message.clone()) {
            warn!(error = %e, topic = %message.topic, "Subscriber lagging, dropping message");
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
