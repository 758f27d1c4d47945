use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ampere_bus::{BusError, HttpError, MessageBus};
use ampere_core::{AccessLogBatch, CabinetId, CabinetMetadata, topic};
use jiff::Timestamp;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cloud::CloudClient;
use crate::state::EdgeState;
use crate::storage::EdgeStore;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl ReconcileError {
    fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        ReconcileError::Store(Box::new(e))
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub interval: Duration,
    pub retry_count: u32,
    pub retry_interval: Duration,
    pub sample_batch: usize,
    pub alert_batch: usize,
    pub assessment_batch: usize,
    pub access_log_batch: usize,
    pub publish_timeout: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            retry_count: 3,
            retry_interval: Duration::from_secs(5),
            sample_batch: 1000,
            alert_batch: 100,
            assessment_batch: 10,
            access_log_batch: 100,
            publish_timeout: Duration::from_secs(5),
        }
    }
}

/// Rows marked synced during one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub samples: usize,
    pub alerts: usize,
    pub assessments: usize,
    pub access_logs: usize,
}

/// Periodically pushes every unsynced row upstream. Rows are marked synced
/// only after a positive response, so any failure leaves them for the next
/// cycle.
pub struct Reconciler<S> {
    store: S,
    cloud: Arc<CloudClient<S>>,
    bus: Arc<dyn MessageBus>,
    cabinet: CabinetId,
    metadata: CabinetMetadata,
    settings: ReconcileSettings,
    state: EdgeState,
    trigger: Arc<Notify>,
}

impl<S: EdgeStore> Reconciler<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: S,
        cloud: Arc<CloudClient<S>>,
        bus: Arc<dyn MessageBus>,
        cabinet: CabinetId,
        metadata: CabinetMetadata,
        settings: ReconcileSettings,
        state: EdgeState,
        trigger: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            cloud,
            bus,
            cabinet,
            metadata,
            settings,
            state,
            trigger,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        if !self.cloud.is_enabled() {
            info!("Cloud sync disabled, reconcile loop not started");
            return;
        }

        info!(
            interval_secs = self.settings.interval.as_secs(),
            retry_count = self.settings.retry_count,
            "Reconcile loop started"
        );

        let mut interval = tokio::time::interval(self.settings.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Reconcile loop shutting down");
                    break;
                }
                _ = interval.tick() => {}
                _ = self.trigger.notified() => {
                    info!("Manual sync triggered");
                }
            }

            let now = Timestamp::now();
            match self.cycle().await {
                Ok(report) => {
                    info!(
                        samples = report.samples,
                        alerts = report.alerts,
                        assessments = report.assessments,
                        access_logs = report.access_logs,
                        "Reconcile cycle complete"
                    );
                    self.state.sync_succeeded(now).await;
                }
                Err(e) => {
                    warn!(error = %e, "Reconcile cycle failed, rows stay pending");
                    self.state.sync_failed(now, e.to_string()).await;
                }
            }
        }
    }

    /// One full pass. The telemetry batch decides success; assessments,
    /// access logs and metadata are best-effort.
    pub async fn cycle(&self) -> Result<CycleReport, ReconcileError> {
        if !self.cloud.is_enabled() {
            return Ok(CycleReport::default());
        }

        if let Err(e) = self.cloud.sync_metadata(&self.metadata).await {
            debug!(error = %e, "Metadata sync failed");
        }

        let (samples, alerts) = self.sync_telemetry().await?;

        let assessments = self.sync_assessments().await.unwrap_or_else(|e| {
            warn!(error = %e, "Vulnerability sync failed");
            0
        });

        let access_logs = self.sync_access_logs().await.unwrap_or_else(|e| {
            debug!(error = %e, "Access log sync deferred");
            0
        });

        Ok(CycleReport {
            samples,
            alerts,
            assessments,
            access_logs,
        })
    }

    async fn sync_telemetry(&self) -> Result<(usize, usize), ReconcileError> {
        let samples = self
            .store
            .unsynced_samples(self.settings.sample_batch)
            .await
            .map_err(ReconcileError::store)?;
        let alerts = self
            .store
            .pending_alerts(self.settings.alert_batch)
            .await
            .map_err(ReconcileError::store)?;

        if samples.is_empty() && alerts.is_empty() {
            return Ok((0, 0));
        }

        let sensor_data: Vec<_> = samples.iter().map(|s| s.to_report()).collect();
        let alert_reports: Vec<_> = alerts.iter().map(|a| a.to_report()).collect();

        self.with_retry("sync batch", || {
            self.cloud
                .sync_batch(sensor_data.clone(), alert_reports.clone())
        })
        .await?;

        let now = Timestamp::now();
        let sample_ids: Vec<_> = samples.iter().map(|s| s.id).collect();
        let versions: Vec<_> = alerts.iter().map(|a| a.version()).collect();

        self.store
            .mark_samples_synced(&sample_ids, now)
            .await
            .map_err(ReconcileError::store)?;
        self.store
            .mark_alerts_synced(&versions, now)
            .await
            .map_err(ReconcileError::store)?;

        Ok((samples.len(), alerts.len()))
    }

    async fn sync_assessments(&self) -> Result<usize, ReconcileError> {
        let assessments = self
            .store
            .unsynced_assessments(self.settings.assessment_batch)
            .await
            .map_err(ReconcileError::store)?;

        let mut synced = 0;
        for assessment in assessments {
            let report = assessment.to_report(self.cabinet.clone());
            if let Err(e) = self.cloud.sync_vulnerability(report).await {
                warn!(assessment_id = assessment.id.0, error = %e, "Failed to sync assessment");
                continue;
            }
            self.store
                .mark_assessment_synced(assessment.id, Timestamp::now())
                .await
                .map_err(ReconcileError::store)?;
            synced += 1;
        }

        Ok(synced)
    }

    async fn sync_access_logs(&self) -> Result<usize, ReconcileError> {
        let logs = self
            .store
            .unsynced_access_logs(self.settings.access_log_batch)
            .await
            .map_err(ReconcileError::store)?;

        if logs.is_empty() {
            return Ok(0);
        }

        let batch = AccessLogBatch {
            cabinet_id: self.cabinet.clone(),
            logs: logs.iter().map(|l| l.to_report()).collect(),
            timestamp: Timestamp::now(),
        };

        let access_topic = topic::access_logs(&self.cabinet);
        let publish = self.bus.publish_json(&access_topic, &batch);
        match tokio::time::timeout(self.settings.publish_timeout, publish).await {
            Ok(result) => result?,
            Err(_) => return Err(BusError::Timeout(self.settings.publish_timeout).into()),
        }

        let ids: Vec<_> = logs.iter().map(|l| l.id).collect();
        self.store
            .mark_access_logs_synced(&ids)
            .await
            .map_err(ReconcileError::store)?;

        Ok(ids.len())
    }

    async fn with_retry<F, Fut>(&self, what: &str, mut call: F) -> Result<(), HttpError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), HttpError>>,
    {
        let mut delay = self.settings.retry_interval;
        let mut attempt = 0;

        loop {
            match call().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.settings.retry_count => {
                    attempt += 1;
                    warn!(
                        what,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Upstream call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
