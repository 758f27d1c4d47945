use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use ampere_core::topic;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{BusError, BusMessage, BusStats, MessageBus, SUBSCRIPTION_BUFFER, StatsRecorder};

/// In-process bus. Clones share one broker, so an edge and a cloud built on
/// clones of the same `MemoryBus` talk to each other. `set_online(false)`
/// simulates a broker outage.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

struct Inner {
    online: AtomicBool,
    next_subscriber: AtomicU64,
    subscribers: DashMap<u64, (String, mpsc::Sender<BusMessage>)>,
    history: Mutex<Vec<BusMessage>>,
    stats: StatsRecorder,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                online: AtomicBool::new(true),
                next_subscriber: AtomicU64::new(0),
                subscribers: DashMap::new(),
                history: Mutex::new(Vec::new()),
                stats: StatsRecorder::default(),
            }),
        }
    }

    pub fn set_online(&self, online: bool) {
        if online && !self.inner.online.load(Ordering::Acquire) {
            self.inner.stats.record_reconnect();
        }
        self.inner.online.store(online, Ordering::Release);
    }

    /// Every message accepted so far, oldest first.
    pub fn published(&self) -> Vec<BusMessage> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn published_on(&self, filter: &str) -> Vec<BusMessage> {
        self.published()
            .into_iter()
            .filter(|m| topic::matches(filter, &m.topic))
            .collect()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if !self.is_connected() {
            self.inner.stats.record_failed();
            return Err(BusError::NotConnected);
        }

        let message = BusMessage {
            topic: topic.to_owned(),
            payload,
        };

        self.inner.subscribers.retain(|_, (_, tx)| !tx.is_closed());
        for entry in self.inner.subscribers.iter() {
            let (filter, tx) = entry.value();
            if topic::matches(filter, topic)
                && let Err(e) = tx.try_send(message.clone())
            {
                warn!(error = %e, topic, "Subscriber lagging, dropping message");
            }
        }

        self.inner
            .stats
            .record_published(message.payload.len(), Duration::ZERO);
        self.inner
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message);

        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.insert(id, (filter.to_owned(), tx));
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    fn stats(&self) -> BusStats {
        self.inner.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_wildcard_subscribers() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe("edge/cabinet/+/alerts").await.unwrap();

        bus.publish("edge/cabinet/CAB-1/alerts", b"a".to_vec())
            .await
            .unwrap();
        bus.publish("traffic/CAB-1", b"b".to_vec()).await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "edge/cabinet/CAB-1/alerts");
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.published().len(), 2);
    }

    #[tokio::test]
    async fn offline_bus_refuses_and_records_nothing() {
        let bus = MemoryBus::new();
        bus.set_online(false);

        let err = bus.publish("traffic/CAB-1", vec![]).await;
        assert!(matches!(err, Err(BusError::NotConnected)));
        assert!(bus.published().is_empty());
        assert_eq!(bus.stats().failed, 1);

        bus.set_online(true);
        assert_eq!(bus.stats().reconnections, 1);
    }

    #[tokio::test]
    async fn clones_share_one_broker() {
        let edge = MemoryBus::new();
        let cloud = edge.clone();
        let mut rx = cloud.subscribe("traffic/+").await.unwrap();

        let bus: &dyn MessageBus = &edge;
        bus.publish_json("traffic/CAB-9", &serde_json::json!({"ok": true}))
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.payload, br#"{"ok":true}"#.to_vec());
    }
}
