use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Reading, SensorSource};
use crate::storage::models::{NewAccessLog, NewSample};

/// Simulated battery modules. Each tick every module reports temperature,
/// cell voltage and state of charge, with occasional excursions that trip
/// the default thresholds.
pub struct MockSensorSource {
    interval: Duration,
    devices: Arc<Vec<String>>,
}

impl MockSensorSource {
    pub fn new(interval_secs: u64, device_count: usize) -> Self {
        let devices = (1..=device_count).map(|n| format!("dev-{n}")).collect();
        Self {
            interval: Duration::from_secs(interval_secs.max(1)),
            devices: Arc::new(devices),
        }
    }

    pub fn device_ids(&self) -> &[String] {
        &self.devices
    }
}

fn generate(device_id: &str) -> Vec<Reading> {
    let mut rng = rand::rng();
    let now = Timestamp::now();

    let temperature = if rng.random_ratio(5, 100) {
        rng.random_range(55.0..70.0)
    } else {
        rng.random_range(20.0..45.0)
    };
    let voltage = if rng.random_ratio(3, 100) {
        rng.random_range(2.7..3.0)
    } else {
        rng.random_range(3.2..4.1)
    };
    let soc = rng.random_range(5.0..100.0);

    let sample = |sensor_type: &str, value: f64, unit: &str, quality: u8| {
        Reading::Sample(NewSample {
            device_id: device_id.to_owned(),
            sensor_type: sensor_type.to_owned(),
            value,
            unit: unit.to_owned(),
            quality,
            timestamp: now,
        })
    };

    vec![
        sample("temperature", temperature, "celsius", rng.random_range(85..=100)),
        sample("voltage", voltage, "volt", rng.random_range(85..=100)),
        sample("soc", soc, "percent", rng.random_range(85..=100)),
        Reading::Access(NewAccessLog {
            subject_type: "device".into(),
            subject_id: device_id.to_owned(),
            action: "publish".into(),
            resource: "telemetry".into(),
            allowed: rng.random_ratio(98, 100),
            timestamp: now,
        }),
    ]
}

#[async_trait]
impl SensorSource for MockSensorSource {
    type Error = std::convert::Infallible;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Reading>, Self::Error> {
        let (tx, rx) = mpsc::channel(100);
        let devices = Arc::clone(&self.devices);
        let interval = self.interval;

        info!(
            device_count = devices.len(),
            interval_secs = interval.as_secs(),
            "Starting mock sensor source"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Mock sensor source shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        for device_id in devices.iter() {
                            for reading in generate(device_id) {
                                if tx.send(reading).await.is_err() {
                                    info!("Channel closed, mock sensor source shutting down");
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_readings_for_every_device() {
        let source = MockSensorSource::new(1, 2);
        assert_eq!(source.device_ids(), ["dev-1", "dev-2"]);

        let cancel = CancellationToken::new();
        let mut rx = source.start(cancel.clone()).await.unwrap();

        let mut samples = 0;
        let mut accesses = 0;
        for _ in 0..8 {
            match rx.recv().await.unwrap() {
                Reading::Sample(s) => {
                    assert!(s.quality >= 85);
                    samples += 1;
                }
                Reading::Access(_) => accesses += 1,
            }
        }
        cancel.cancel();

        assert_eq!(samples, 6);
        assert_eq!(accesses, 2);
    }
}
