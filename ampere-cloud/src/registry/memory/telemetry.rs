use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use ampere_core::{
    AccessLogId, AccessLogReport, AssessmentId, CabinetId, SampleId, SensorReport,
    VulnerabilityReport,
};
use async_trait::async_trait;
use jiff::Timestamp;
use tokio::sync::RwLock;

use crate::registry::TelemetryRegistry;
use crate::registry::models::TelemetryCounts;

#[derive(Default)]
struct Received {
    samples: HashMap<(CabinetId, SampleId), SensorReport>,
    access_logs: HashMap<(CabinetId, AccessLogId), AccessLogReport>,
    assessments: HashMap<(CabinetId, AssessmentId), VulnerabilityReport>,
}

#[derive(Clone, Default)]
pub struct InMemoryTelemetryRegistry {
    received: Arc<RwLock<Received>>,
}

#[async_trait]
impl TelemetryRegistry for InMemoryTelemetryRegistry {
    type Error = Infallible;

    async fn store_samples(
        &self,
        cabinet: &CabinetId,
        samples: &[SensorReport],
        _at: Timestamp,
    ) -> Result<usize, Self::Error> {
        let mut received = self.received.write().await;
        let mut inserted = 0;

        for sample in samples {
            let key = (cabinet.clone(), sample.id);
            if !received.samples.contains_key(&key) {
                received.samples.insert(key, sample.clone());
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    async fn store_access_logs(
        &self,
        cabinet: &CabinetId,
        logs: &[AccessLogReport],
    ) -> Result<usize, Self::Error> {
        let mut received = self.received.write().await;
        let mut inserted = 0;

        for log in logs {
            let key = (cabinet.clone(), log.id);
            if !received.access_logs.contains_key(&key) {
                received.access_logs.insert(key, log.clone());
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    async fn store_assessment(&self, report: &VulnerabilityReport) -> Result<(), Self::Error> {
        let mut received = self.received.write().await;
        received
            .assessments
            .entry((report.cabinet_id.clone(), report.assessment_id))
            .or_insert_with(|| report.clone());
        Ok(())
    }

    async fn latest_assessment(
        &self,
        cabinet: &CabinetId,
    ) -> Result<Option<VulnerabilityReport>, Self::Error> {
        let received = self.received.read().await;
        Ok(received
            .assessments
            .values()
            .filter(|a| &a.cabinet_id == cabinet)
            .max_by_key(|a| a.timestamp)
            .cloned())
    }

    async fn counts(&self, cabinet: &CabinetId) -> Result<TelemetryCounts, Self::Error> {
        let received = self.received.read().await;
        Ok(TelemetryCounts {
            samples: received.samples.keys().filter(|(c, _)| c == cabinet).count(),
            access_logs: received.access_logs.keys().filter(|(c, _)| c == cabinet).count(),
            assessments: received.assessments.keys().filter(|(c, _)| c == cabinet).count(),
        })
    }
}
