use std::sync::Arc;
use std::time::Duration;

use ampere_bus::{BusError, Delivery, DeliveryError, Fallback, MessageBus};
use ampere_core::{AlertReport, CabinetId, topic};
use async_trait::async_trait;
use jiff::Timestamp;
use serde::Serialize;
use tracing::{info, warn};

use crate::cloud::CloudClient;
use crate::storage::EdgeStore;
use crate::storage::models::AlertRecord;

type TopicFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

/// Publishes `T` as JSON on a topic derived from the item, waiting at most
/// `timeout` for the transport to confirm.
pub struct BusDelivery<T> {
    bus: Arc<dyn MessageBus>,
    timeout: Duration,
    topic: TopicFn<T>,
}

impl<T> BusDelivery<T> {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        timeout: Duration,
        topic: impl Fn(&T) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            bus,
            timeout,
            topic: Box::new(topic),
        }
    }
}

#[async_trait]
impl<T: Serialize + Sync> Delivery<T> for BusDelivery<T> {
    fn name(&self) -> &'static str {
        "bus"
    }

    async fn deliver(&self, item: &T) -> Result<(), DeliveryError> {
        let topic = (self.topic)(item);
        match tokio::time::timeout(self.timeout, self.bus.publish_json(&topic, item)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BusError::Timeout(self.timeout).into()),
        }
    }
}

/// One-alert batch on `POST /cabinets/{id}/alerts/sync`.
pub struct HttpAlertDelivery<S> {
    cloud: Arc<CloudClient<S>>,
}

#[async_trait]
impl<S: EdgeStore> Delivery<AlertReport> for HttpAlertDelivery<S> {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, report: &AlertReport) -> Result<(), DeliveryError> {
        if !self.cloud.is_enabled() {
            return Err(DeliveryError::Unavailable("cloud sync disabled".into()));
        }
        Ok(self.cloud.sync_alerts(vec![report.clone()]).await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered(&'static str),
    /// Left unsynced for the reconcile loop.
    Deferred,
}

/// Low-latency path for a freshly created or updated alert.
pub struct AlertPusher<S> {
    store: S,
    route: Fallback<AlertReport>,
}

impl<S: EdgeStore> AlertPusher<S> {
    pub fn new(
        store: S,
        bus: Arc<dyn MessageBus>,
        cabinet: CabinetId,
        cloud: Arc<CloudClient<S>>,
        publish_timeout: Duration,
    ) -> Self {
        let alerts_topic = topic::alerts(&cabinet);
        let route = Fallback::new()
            .then(BusDelivery::new(bus, publish_timeout, move |_: &AlertReport| {
                alerts_topic.clone()
            }))
            .then(HttpAlertDelivery { cloud });

        Self { store, route }
    }

    pub async fn push(&self, alert: &AlertRecord) -> PushOutcome {
        let report = alert.to_report();

        let via = match self.route.deliver(&report).await {
            Ok(via) => via,
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "Alert push deferred to reconcile");
                return PushOutcome::Deferred;
            }
        };

        if let Err(e) = self
            .store
            .mark_alerts_synced(&[alert.version()], Timestamp::now())
            .await
        {
            warn!(alert_id = %alert.id, error = %e, "Failed to mark pushed alert as synced");
        }

        info!(alert_id = %alert.id, alert_type = %alert.alert_type, via, "Alert pushed");
        PushOutcome::Delivered(via)
    }
}
