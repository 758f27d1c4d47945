use ampere_bus::{HttpClient, HttpError};
use ampere_core::{
    AlertReport, CabinetMetadata, CommandAck, SensorReport, SyncPayload, VulnerabilityReport,
};
use jiff::Timestamp;
use tracing::debug;

use crate::credentials::{CredentialProvider, Credentials};
use crate::storage::EdgeStore;

/// Control-plane REST calls made by the edge. Credentials are resolved per
/// call so a rotated key is picked up without a restart.
pub struct CloudClient<S> {
    http: HttpClient,
    credentials: CredentialProvider<S>,
    enabled: bool,
}

impl<S: EdgeStore> CloudClient<S> {
    pub fn new(http: HttpClient, credentials: CredentialProvider<S>, enabled: bool) -> Self {
        Self {
            http,
            credentials,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn credentials(&self) -> &CredentialProvider<S> {
        &self.credentials
    }

    /// `POST /cabinets/{id}/sync`
    pub async fn sync_batch(
        &self,
        sensor_data: Vec<SensorReport>,
        alerts: Vec<AlertReport>,
    ) -> Result<(), HttpError> {
        let creds = self.credentials.current().await;
        let url = creds.url(&format!("/cabinets/{}/sync", creds.cabinet_id));
        let payload = payload(&creds, sensor_data, alerts);

        debug!(url, samples = payload.sensor_data.len(), alerts = payload.alerts.len(), "Posting sync batch");
        self.http.post_json(&url, &creds.api_key, &payload).await
    }

    /// `POST /cabinets/{id}/alerts/sync`
    pub async fn sync_alerts(&self, alerts: Vec<AlertReport>) -> Result<(), HttpError> {
        let creds = self.credentials.current().await;
        let url = creds.url(&format!("/cabinets/{}/alerts/sync", creds.cabinet_id));
        let payload = payload(&creds, Vec::new(), alerts);

        self.http.post_json(&url, &creds.api_key, &payload).await
    }

    /// `PUT /cabinets/{id}/sync`
    pub async fn sync_metadata(&self, metadata: &CabinetMetadata) -> Result<(), HttpError> {
        let creds = self.credentials.current().await;
        let url = creds.url(&format!("/cabinets/{}/sync", creds.cabinet_id));

        self.http.put_json(&url, &creds.api_key, metadata).await
    }

    /// `POST /cabinets/{id}/vulnerability/sync`. The report's cabinet id is
    /// replaced with the one the credentials belong to.
    pub async fn sync_vulnerability(&self, report: VulnerabilityReport) -> Result<(), HttpError> {
        let creds = self.credentials.current().await;
        let url = creds.url(&format!("/cabinets/{}/vulnerability/sync", creds.cabinet_id));
        let report = VulnerabilityReport {
            cabinet_id: creds.cabinet_id.clone(),
            ..report
        };

        self.http.post_json(&url, &creds.api_key, &report).await
    }

    /// `POST /commands/{command_id}/ack`
    pub async fn ack_command(&self, ack: &CommandAck) -> Result<(), HttpError> {
        let creds = self.credentials.current().await;
        let url = creds.url(&format!("/commands/{}/ack", ack.command_id));

        self.http.post_json(&url, &creds.api_key, ack).await
    }
}

fn payload(
    creds: &Credentials,
    sensor_data: Vec<SensorReport>,
    alerts: Vec<AlertReport>,
) -> SyncPayload {
    SyncPayload {
        cabinet_id: creds.cabinet_id.clone(),
        timestamp: Timestamp::now(),
        sensor_data,
        alerts,
    }
}
