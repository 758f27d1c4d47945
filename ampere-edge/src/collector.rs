use std::sync::Arc;

use ampere_bus::MessageBus;
use ampere_core::{CabinetId, topic};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ThresholdConfig;
use crate::push::AlertPusher;
use crate::source::Reading;
use crate::storage::EdgeStore;
use crate::storage::models::{AlertCondition, AlertRecord, NewAccessLog, NewSample, SensorSample};

/// Returns the first threshold `sample` breaches.
pub fn evaluate(thresholds: &[ThresholdConfig], sample: &SensorSample) -> Option<AlertCondition> {
    thresholds
        .iter()
        .filter(|t| t.sensor_type == sample.sensor_type)
        .find_map(|t| {
            let (limit, direction) = match (t.min, t.max) {
                (_, Some(max)) if sample.value > max => (max, "above"),
                (Some(min), _) if sample.value < min => (min, "below"),
                _ => return None,
            };

            Some(AlertCondition {
                device_id: sample.device_id.clone(),
                alert_type: t.alert_type.clone(),
                severity: t.severity,
                message: format!(
                    "{} {:.2} {} {direction} threshold {limit:.2}",
                    sample.sensor_type, sample.value, sample.unit
                ),
                value: sample.value,
                threshold: limit,
                timestamp: sample.timestamp,
            })
        })
}

/// Persists field data, mirrors it live on the bus, and raises alerts.
pub struct Collector<S> {
    store: S,
    pusher: Arc<AlertPusher<S>>,
    bus: Arc<dyn MessageBus>,
    cabinet: CabinetId,
    thresholds: Vec<ThresholdConfig>,
}

impl<S: EdgeStore> Collector<S> {
    pub fn new(
        store: S,
        pusher: Arc<AlertPusher<S>>,
        bus: Arc<dyn MessageBus>,
        cabinet: CabinetId,
        thresholds: Vec<ThresholdConfig>,
    ) -> Self {
        Self {
            store,
            pusher,
            bus,
            cabinet,
            thresholds,
        }
    }

    /// Stores one sample. A threshold breach upserts the open alert for the
    /// device and hands it to the push path in the background; the updated
    /// alert is returned without waiting for delivery.
    pub async fn record(&self, sample: NewSample) -> Result<Option<AlertRecord>, S::Error> {
        let stored = self.store.insert_sample(sample).await?;
        debug!(sample_id = stored.id.0, device_id = %stored.device_id, sensor_type = %stored.sensor_type, "Stored sample");

        if self.bus.is_connected() {
            let live = topic::sensor(&self.cabinet, &stored.device_id, &stored.sensor_type);
            if let Err(e) = self.bus.publish_json(&live, &stored.to_report()).await {
                debug!(error = %e, "Live telemetry publish failed");
            }
        }

        let Some(condition) = evaluate(&self.thresholds, &stored) else {
            return Ok(None);
        };

        let alert = self.store.upsert_alert(condition).await?;
        warn!(
            alert_id = %alert.id,
            device_id = %alert.device_id,
            alert_type = %alert.alert_type,
            value = alert.value,
            revision = alert.revision,
            "Threshold breached"
        );

        let pusher = Arc::clone(&self.pusher);
        let pushed = alert.clone();
        tokio::spawn(async move {
            pusher.push(&pushed).await;
        });

        Ok(Some(alert))
    }

    pub async fn record_access(&self, log: NewAccessLog) -> Result<(), S::Error> {
        self.store.insert_access_log(log).await?;
        Ok(())
    }
}

pub async fn run_collector<S: EdgeStore>(
    collector: Collector<S>,
    mut readings: mpsc::Receiver<Reading>,
    cancel: CancellationToken,
) {
    info!("Collector started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Collector shutting down");
                break;
            }
            reading = readings.recv() => {
                let Some(reading) = reading else {
                    info!("Sensor source closed, collector stopping");
                    break;
                };

                let result = match reading {
                    Reading::Sample(sample) => collector.record(sample).await.map(|_| ()),
                    Reading::Access(log) => collector.record_access(log).await,
                };
                if let Err(e) = result {
                    error!(error = %e, "Failed to store reading");
                }
            }
        }
    }
}
