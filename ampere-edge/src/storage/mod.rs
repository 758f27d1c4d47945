pub mod memory;
pub mod models;
pub mod sqlite;

use ampere_core::{
    AccessLogId, AssessmentId, CabinetId, EdgeAlertId, PolicyDocument, PolicyId, SampleId,
};
use async_trait::async_trait;
use jiff::Timestamp;
use serde::Serialize;

use models::{
    AccessLog, AlertCondition, AlertRecord, AlertVersion, LicenseState, NewAccessLog,
    NewAssessment, NewSample, SensorSample, StoredCredentials, StoredPolicy,
    VulnerabilityAssessment,
};

/// Local persistence for everything the edge produces or receives.
///
/// Rows carry a synced flag or timestamp. The reconcile loop reads unsynced
/// rows and flips them only after the cloud accepted them, so a crash between
/// the two leaves data pending rather than lost.
#[async_trait]
pub trait EdgeStore: Clone + Send + Sync + 'static {
    /// Error type specific to this storage implementation
    type Error: std::error::Error + Send + Sync + 'static;

    async fn insert_sample(&self, sample: NewSample) -> Result<SensorSample, Self::Error>;

    /// Oldest unsynced samples first.
    async fn unsynced_samples(&self, limit: usize) -> Result<Vec<SensorSample>, Self::Error>;

    async fn mark_samples_synced(&self, ids: &[SampleId], at: Timestamp)
    -> Result<(), Self::Error>;

    /// Inserts a new open alert, or updates the open alert with the same
    /// `(device_id, alert_type)`. Either way the alert becomes pending again.
    async fn upsert_alert(&self, condition: AlertCondition) -> Result<AlertRecord, Self::Error>;

    async fn get_alert(&self, id: EdgeAlertId) -> Result<Option<AlertRecord>, Self::Error>;

    /// Newest first.
    async fn list_alerts(&self, include_resolved: bool) -> Result<Vec<AlertRecord>, Self::Error>;

    /// Alerts never synced, plus resolved alerts whose resolution happened
    /// after their last sync. Oldest first.
    async fn pending_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, Self::Error>;

    /// Marks only the listed revisions. An alert updated since it was read
    /// stays pending.
    async fn mark_alerts_synced(
        &self,
        versions: &[AlertVersion],
        at: Timestamp,
    ) -> Result<(), Self::Error>;

    async fn resolve_alert(&self, id: EdgeAlertId, at: Timestamp)
    -> Result<AlertRecord, Self::Error>;

    async fn insert_assessment(
        &self,
        assessment: NewAssessment,
    ) -> Result<VulnerabilityAssessment, Self::Error>;

    /// Newest first.
    async fn unsynced_assessments(
        &self,
        limit: usize,
    ) -> Result<Vec<VulnerabilityAssessment>, Self::Error>;

    async fn mark_assessment_synced(
        &self,
        id: AssessmentId,
        at: Timestamp,
    ) -> Result<(), Self::Error>;

    async fn insert_access_log(&self, log: NewAccessLog) -> Result<AccessLog, Self::Error>;

    async fn unsynced_access_logs(&self, limit: usize) -> Result<Vec<AccessLog>, Self::Error>;

    async fn mark_access_logs_synced(&self, ids: &[AccessLogId]) -> Result<(), Self::Error>;

    async fn save_policy(&self, policy: PolicyDocument, at: Timestamp)
    -> Result<(), Self::Error>;

    /// Returns whether a policy was removed.
    async fn delete_policy(&self, id: &PolicyId) -> Result<bool, Self::Error>;

    async fn clear_policies(&self) -> Result<(), Self::Error>;

    async fn list_policies(&self) -> Result<Vec<StoredPolicy>, Self::Error>;

    async fn upsert_credentials(&self, credentials: StoredCredentials)
    -> Result<(), Self::Error>;

    /// The earliest-created enabled credential row, if any.
    async fn first_enabled_credentials(&self) -> Result<Option<StoredCredentials>, Self::Error>;

    async fn credentials_for(
        &self,
        cabinet_id: &CabinetId,
    ) -> Result<Option<StoredCredentials>, Self::Error>;

    async fn current_license(&self) -> Result<Option<LicenseState>, Self::Error>;

    async fn store_license(&self, token: &str, at: Timestamp) -> Result<(), Self::Error>;

    /// Returns whether an active license was revoked.
    async fn revoke_license(&self, at: Timestamp) -> Result<bool, Self::Error>;

    async fn stats(&self) -> Result<StoreStats, Self::Error>;
}

/// Statistics about stored data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub samples_pending: usize,
    pub samples_total: usize,
    pub alerts_pending: usize,
    pub alerts_open: usize,
    pub assessments_pending: usize,
    pub access_logs_pending: usize,
    pub policies: usize,
}
