pub mod fallback;
pub mod http;
pub mod memory;
pub mod mqtt;
mod stats;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use fallback::{Delivery, DeliveryError, Fallback, FallbackError};
pub use http::{HttpClient, HttpError};
pub use memory::MemoryBus;
pub use mqtt::{MqttBus, MqttConfig};
pub use stats::{BusStats, StatsRecorder};

/// Capacity of each subscription channel.
pub const SUBSCRIPTION_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("not connected to broker")]
    NotConnected,
    #[error("publish not confirmed within {0:?}")]
    Timeout(Duration),
    #[error("connection lost before confirmation: {0}")]
    Dropped(#[from] oneshot::error::RecvError),
    #[error("client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Publish/subscribe transport.
///
/// `publish` returns only once the transport confirmed the message (broker
/// PUBACK for MQTT) or the bounded wait elapsed. It never blocks indefinitely.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    async fn subscribe(&self, filter: &str) -> Result<mpsc::Receiver<BusMessage>, BusError>;

    fn is_connected(&self) -> bool;

    fn stats(&self) -> BusStats;
}

impl dyn MessageBus {
    pub async fn publish_json<T>(&self, topic: &str, value: &T) -> Result<(), BusError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(value)?;
        self.publish(topic, payload).await
    }
}

/// Transport configuration shared by both binaries.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BusConfig {
    Mqtt(MqttConfig),
    Disabled,
}

/// Bus used when no broker is configured. Every publish fails so callers fall
/// back to HTTP, and subscriptions stay open but silent.
#[derive(Default)]
pub struct DisconnectedBus {
    silent: Mutex<Vec<mpsc::Sender<BusMessage>>>,
}

#[async_trait]
impl MessageBus for DisconnectedBus {
    async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), BusError> {
        Err(BusError::NotConnected)
    }

    async fn subscribe(&self, _filter: &str) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        let (tx, rx) = mpsc::channel(1);
        self.silent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn stats(&self) -> BusStats {
        BusStats::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disconnected_bus_rejects_publishes() {
        let bus = DisconnectedBus::default();
        let err = bus.publish("edge/cabinet/CAB-1/alerts", vec![]).await;
        assert!(matches!(err, Err(BusError::NotConnected)));
        assert!(!bus.is_connected());
    }

    #[tokio::test]
    async fn disconnected_subscriptions_stay_open() {
        let bus = DisconnectedBus::default();
        let mut rx = bus.subscribe("sensors/#").await.unwrap();
        let polled = tokio::time::timeout(Duration::from_millis(20), rx.recv()).await;
        assert!(polled.is_err(), "receiver should be pending, not closed");
    }

    #[test]
    fn bus_config_is_tagged() {
        let config: BusConfig = toml::from_str(r#"type = "disabled""#).unwrap();
        assert!(matches!(config, BusConfig::Disabled));
    }
}
