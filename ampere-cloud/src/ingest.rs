//! Upstream data from cabinets, shared by the HTTP routes and the bus
//! subscriber.

use ampere_core::{
    AccessLogReport, AlertReport, CabinetId, CabinetMetadata, SyncPayload, VulnerabilityReport,
};
use jiff::Timestamp;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::registry::models::CloudAlert;
use crate::registry::{
    AlertRegistry, CabinetRegistry, Registries, RegistryError, TelemetryRegistry, boxed,
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cabinet {0} not found")]
    UnknownCabinet(CabinetId),
    #[error("payload for cabinet {payload} sent as cabinet {sender}")]
    CabinetMismatch { payload: CabinetId, sender: CabinetId },
    #[error("registry error: {0}")]
    Registry(RegistryError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub samples_received: usize,
    pub samples_stored: usize,
    pub alerts: usize,
}

#[derive(Clone)]
pub struct Ingest<R> {
    registries: R,
}

impl<R: Registries> Ingest<R> {
    pub fn new(registries: R) -> Self {
        Self { registries }
    }

    async fn require_cabinet(&self, cabinet: &CabinetId) -> Result<(), IngestError> {
        let found = self
            .registries
            .cabinets()
            .get(cabinet)
            .await
            .map_err(|e| IngestError::Registry(boxed(e)))?;

        match found {
            Some(_) => Ok(()),
            None => Err(IngestError::UnknownCabinet(cabinet.clone())),
        }
    }

    /// Batch reconciliation: samples and alerts in one payload.
    pub async fn sync(
        &self,
        cabinet: &CabinetId,
        payload: &SyncPayload,
    ) -> Result<SyncSummary, IngestError> {
        if &payload.cabinet_id != cabinet {
            return Err(IngestError::CabinetMismatch {
                payload: payload.cabinet_id.clone(),
                sender: cabinet.clone(),
            });
        }
        self.require_cabinet(cabinet).await?;

        let now = Timestamp::now();
        let samples_stored = self
            .registries
            .telemetry()
            .store_samples(cabinet, &payload.sensor_data, now)
            .await
            .map_err(|e| IngestError::Registry(boxed(e)))?;

        let alerts = self.upsert_alerts(cabinet, &payload.alerts, now).await?;

        self.registries
            .cabinets()
            .touch_sync(cabinet, now)
            .await
            .map_err(|e| IngestError::Registry(boxed(e)))?;

        let summary = SyncSummary {
            samples_received: payload.sensor_data.len(),
            samples_stored,
            alerts: alerts.len(),
        };
        info!(
            cabinet_id = %cabinet,
            samples_received = summary.samples_received,
            samples_stored,
            alerts = summary.alerts,
            "Sync batch ingested"
        );
        Ok(summary)
    }

    /// Immediate push path, over HTTP or the bus.
    pub async fn alerts(
        &self,
        cabinet: &CabinetId,
        reports: &[AlertReport],
    ) -> Result<Vec<CloudAlert>, IngestError> {
        self.require_cabinet(cabinet).await?;
        self.upsert_alerts(cabinet, reports, Timestamp::now()).await
    }

    async fn upsert_alerts(
        &self,
        cabinet: &CabinetId,
        reports: &[AlertReport],
        at: Timestamp,
    ) -> Result<Vec<CloudAlert>, IngestError> {
        let mut upserted = Vec::with_capacity(reports.len());

        for report in reports {
            let alert = self
                .registries
                .alerts()
                .upsert(cabinet, report, at)
                .await
                .map_err(|e| IngestError::Registry(boxed(e)))?;
            debug!(
                alert_id = %alert.id,
                cabinet_id = %cabinet,
                alert_type = %alert.alert_type,
                device_id = %alert.device_id,
                resolved = alert.resolved,
                "Alert upserted"
            );
            upserted.push(alert);
        }

        Ok(upserted)
    }

    pub async fn metadata(
        &self,
        cabinet: &CabinetId,
        metadata: &CabinetMetadata,
    ) -> Result<(), IngestError> {
        let updated = self
            .registries
            .cabinets()
            .update_metadata(cabinet, metadata)
            .await
            .map_err(|e| IngestError::Registry(boxed(e)))?;
        if !updated {
            return Err(IngestError::UnknownCabinet(cabinet.clone()));
        }

        debug!(cabinet_id = %cabinet, firmware = ?metadata.firmware_version, "Cabinet metadata updated");
        Ok(())
    }

    /// The stored report always carries `cabinet`, whatever the body says.
    pub async fn vulnerability(
        &self,
        cabinet: &CabinetId,
        report: VulnerabilityReport,
    ) -> Result<(), IngestError> {
        self.require_cabinet(cabinet).await?;

        let report = VulnerabilityReport {
            cabinet_id: cabinet.clone(),
            ..report
        };
        self.registries
            .telemetry()
            .store_assessment(&report)
            .await
            .map_err(|e| IngestError::Registry(boxed(e)))?;

        info!(
            cabinet_id = %cabinet,
            assessment_id = report.assessment_id.0,
            overall_score = report.overall_score,
            risk_level = %report.risk_level,
            "Vulnerability assessment stored"
        );
        Ok(())
    }

    /// Entries made by the system principal are dropped before storage.
    /// Returns how many new entries were kept.
    pub async fn access_logs(
        &self,
        cabinet: &CabinetId,
        logs: &[AccessLogReport],
    ) -> Result<usize, IngestError> {
        self.require_cabinet(cabinet).await?;

        let kept: Vec<AccessLogReport> = logs
            .iter()
            .filter(|log| !log.is_system_principal())
            .cloned()
            .collect();
        if kept.len() < logs.len() {
            debug!(cabinet_id = %cabinet, dropped = logs.len() - kept.len(), "Dropped system access logs");
        }
        if kept.is_empty() {
            return Ok(0);
        }

        let stored = self
            .registries
            .telemetry()
            .store_access_logs(cabinet, &kept)
            .await
            .map_err(|e| IngestError::Registry(boxed(e)))?;
        if stored < kept.len() {
            warn!(cabinet_id = %cabinet, redelivered = kept.len() - stored, "Ignored redelivered access logs");
        }
        Ok(stored)
    }
}
