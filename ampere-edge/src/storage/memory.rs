use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ampere_core::{
    AccessLogId, AssessmentId, CabinetId, EdgeAlertId, PolicyDocument, PolicyId, SampleId,
};
use async_trait::async_trait;
use jiff::Timestamp;

use crate::storage::models::{
    AccessLog, AlertCondition, AlertRecord, AlertVersion, LicenseState, NewAccessLog,
    NewAssessment, NewSample, SensorSample, StoredCredentials, StoredPolicy,
    VulnerabilityAssessment,
};
use crate::storage::{EdgeStore, StoreStats};

/// In-memory store. Used by tests and by `storage.type = "memory"`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    samples: BTreeMap<SampleId, SensorSample>,
    alerts: BTreeMap<EdgeAlertId, AlertRecord>,
    assessments: BTreeMap<AssessmentId, VulnerabilityAssessment>,
    access_logs: BTreeMap<AccessLogId, AccessLog>,
    policies: BTreeMap<PolicyId, StoredPolicy>,
    // Insertion order doubles as creation order.
    credentials: Vec<StoredCredentials>,
    license: Option<LicenseState>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    #[error("mutex poisoned: {0}")]
    MutexPoisoned(String),
    #[error("not found")]
    NotFound,
}

impl<T> From<PoisonError<T>> for MemoryStoreError {
    fn from(err: PoisonError<T>) -> Self {
        MemoryStoreError::MutexPoisoned(err.to_string())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, MemoryStoreError> {
        Ok(self.tables.lock()?)
    }
}

#[async_trait]
impl EdgeStore for MemoryStore {
    type Error = MemoryStoreError;

    async fn insert_sample(&self, sample: NewSample) -> Result<SensorSample, Self::Error> {
        let mut tables = self.tables()?;
        let id = SampleId(tables.next_id());
        let stored = SensorSample {
            id,
            device_id: sample.device_id,
            sensor_type: sample.sensor_type,
            value: sample.value,
            unit: sample.unit,
            quality: sample.quality.min(100),
            timestamp: sample.timestamp,
            synced: false,
            synced_at: None,
        };
        tables.samples.insert(id, stored.clone());
        Ok(stored)
    }

    async fn unsynced_samples(&self, limit: usize) -> Result<Vec<SensorSample>, Self::Error> {
        let tables = self.tables()?;
        let mut pending: Vec<_> = tables
            .samples
            .values()
            .filter(|s| !s.synced)
            .cloned()
            .collect();
        pending.sort_by_key(|s| (s.timestamp, s.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_samples_synced(
        &self,
        ids: &[SampleId],
        at: Timestamp,
    ) -> Result<(), Self::Error> {
        let mut tables = self.tables()?;
        for id in ids {
            if let Some(sample) = tables.samples.get_mut(id) {
                sample.synced = true;
                sample.synced_at = Some(at);
            }
        }
        Ok(())
    }

    async fn upsert_alert(&self, condition: AlertCondition) -> Result<AlertRecord, Self::Error> {
        let mut tables = self.tables()?;

        let open = tables.alerts.values_mut().find(|a| {
            !a.resolved && a.device_id == condition.device_id && a.alert_type == condition.alert_type
        });

        if let Some(alert) = open {
            alert.severity = condition.severity;
            alert.message = condition.message;
            alert.value = condition.value;
            alert.threshold = condition.threshold;
            alert.timestamp = condition.timestamp;
            alert.revision += 1;
            alert.synced_at = None;
            return Ok(alert.clone());
        }

        let id = EdgeAlertId(tables.next_id());
        let record = AlertRecord {
            id,
            device_id: condition.device_id,
            alert_type: condition.alert_type,
            severity: condition.severity,
            message: condition.message,
            value: condition.value,
            threshold: condition.threshold,
            timestamp: condition.timestamp,
            created_at: condition.timestamp,
            resolved: false,
            resolved_at: None,
            synced_at: None,
            revision: 1,
        };
        tables.alerts.insert(id, record.clone());
        Ok(record)
    }

    async fn get_alert(&self, id: EdgeAlertId) -> Result<Option<AlertRecord>, Self::Error> {
        Ok(self.tables()?.alerts.get(&id).cloned())
    }

    async fn list_alerts(&self, include_resolved: bool) -> Result<Vec<AlertRecord>, Self::Error> {
        let tables = self.tables()?;
        let mut alerts: Vec<_> = tables
            .alerts
            .values()
            .filter(|a| include_resolved || !a.resolved)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        Ok(alerts)
    }

    async fn pending_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, Self::Error> {
        let tables = self.tables()?;
        let mut pending: Vec<_> = tables
            .alerts
            .values()
            .filter(|a| a.needs_sync())
            .cloned()
            .collect();
        pending.sort_by_key(|a| (a.timestamp, a.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_alerts_synced(
        &self,
        versions: &[AlertVersion],
        at: Timestamp,
    ) -> Result<(), Self::Error> {
        let mut tables = self.tables()?;
        for version in versions {
            if let Some(alert) = tables.alerts.get_mut(&version.id)
                && alert.revision == version.revision
            {
                alert.synced_at = Some(at);
            }
        }
        Ok(())
    }

    async fn resolve_alert(
        &self,
        id: EdgeAlertId,
        at: Timestamp,
    ) -> Result<AlertRecord, Self::Error> {
        let mut tables = self.tables()?;
        let alert = tables
            .alerts
            .get_mut(&id)
            .ok_or(MemoryStoreError::NotFound)?;

        alert.resolved = true;
        alert.resolved_at = Some(at);
        alert.synced_at = None;
        alert.revision += 1;
        Ok(alert.clone())
    }

    async fn insert_assessment(
        &self,
        assessment: NewAssessment,
    ) -> Result<VulnerabilityAssessment, Self::Error> {
        let mut tables = self.tables()?;
        let id = AssessmentId(tables.next_id());
        let stored = VulnerabilityAssessment {
            id,
            timestamp: assessment.timestamp,
            license_compliance_score: assessment.license_compliance_score,
            communication_score: assessment.communication_score,
            config_security_score: assessment.config_security_score,
            data_anomaly_score: assessment.data_anomaly_score,
            overall_score: assessment.overall_score,
            risk_level: assessment.risk_level,
            detected_vulnerabilities: assessment.detected_vulnerabilities,
            synced: false,
        };
        tables.assessments.insert(id, stored.clone());
        Ok(stored)
    }

    async fn unsynced_assessments(
        &self,
        limit: usize,
    ) -> Result<Vec<VulnerabilityAssessment>, Self::Error> {
        let tables = self.tables()?;
        let mut pending: Vec<_> = tables
            .assessments
            .values()
            .filter(|a| !a.synced)
            .cloned()
            .collect();
        pending.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_assessment_synced(
        &self,
        id: AssessmentId,
        _at: Timestamp,
    ) -> Result<(), Self::Error> {
        if let Some(assessment) = self.tables()?.assessments.get_mut(&id) {
            assessment.synced = true;
        }
        Ok(())
    }

    async fn insert_access_log(&self, log: NewAccessLog) -> Result<AccessLog, Self::Error> {
        let mut tables = self.tables()?;
        let id = AccessLogId(tables.next_id());
        let stored = AccessLog {
            id,
            subject_type: log.subject_type,
            subject_id: log.subject_id,
            action: log.action,
            resource: log.resource,
            allowed: log.allowed,
            timestamp: log.timestamp,
            synced: false,
        };
        tables.access_logs.insert(id, stored.clone());
        Ok(stored)
    }

    async fn unsynced_access_logs(&self, limit: usize) -> Result<Vec<AccessLog>, Self::Error> {
        let tables = self.tables()?;
        let mut pending: Vec<_> = tables
            .access_logs
            .values()
            .filter(|l| !l.synced)
            .cloned()
            .collect();
        pending.sort_by_key(|l| (l.timestamp, l.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_access_logs_synced(&self, ids: &[AccessLogId]) -> Result<(), Self::Error> {
        let mut tables = self.tables()?;
        for id in ids {
            if let Some(log) = tables.access_logs.get_mut(id) {
                log.synced = true;
            }
        }
        Ok(())
    }

    async fn save_policy(&self, policy: PolicyDocument, at: Timestamp) -> Result<(), Self::Error> {
        self.tables()?.policies.insert(
            policy.id.clone(),
            StoredPolicy {
                policy,
                updated_at: at,
            },
        );
        Ok(())
    }

    async fn delete_policy(&self, id: &PolicyId) -> Result<bool, Self::Error> {
        Ok(self.tables()?.policies.remove(id).is_some())
    }

    async fn clear_policies(&self) -> Result<(), Self::Error> {
        self.tables()?.policies.clear();
        Ok(())
    }

    async fn list_policies(&self) -> Result<Vec<StoredPolicy>, Self::Error> {
        Ok(self.tables()?.policies.values().cloned().collect())
    }

    async fn upsert_credentials(
        &self,
        credentials: StoredCredentials,
    ) -> Result<(), Self::Error> {
        let mut tables = self.tables()?;
        match tables
            .credentials
            .iter_mut()
            .find(|c| c.cabinet_id == credentials.cabinet_id)
        {
            Some(existing) => {
                existing.api_key = credentials.api_key;
                existing.endpoint = credentials.endpoint;
                existing.enabled = credentials.enabled;
                existing.updated_at = credentials.updated_at;
            }
            None => tables.credentials.push(credentials),
        }
        Ok(())
    }

    async fn first_enabled_credentials(&self) -> Result<Option<StoredCredentials>, Self::Error> {
        Ok(self
            .tables()?
            .credentials
            .iter()
            .find(|c| c.enabled)
            .cloned())
    }

    async fn credentials_for(
        &self,
        cabinet_id: &CabinetId,
    ) -> Result<Option<StoredCredentials>, Self::Error> {
        Ok(self
            .tables()?
            .credentials
            .iter()
            .find(|c| &c.cabinet_id == cabinet_id)
            .cloned())
    }

    async fn current_license(&self) -> Result<Option<LicenseState>, Self::Error> {
        Ok(self.tables()?.license.clone())
    }

    async fn store_license(&self, token: &str, at: Timestamp) -> Result<(), Self::Error> {
        self.tables()?.license = Some(LicenseState {
            token: token.to_owned(),
            applied_at: at,
            revoked_at: None,
        });
        Ok(())
    }

    async fn revoke_license(&self, at: Timestamp) -> Result<bool, Self::Error> {
        let mut tables = self.tables()?;
        match tables.license.as_mut() {
            Some(license) if license.is_active() => {
                license.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stats(&self) -> Result<StoreStats, Self::Error> {
        let tables = self.tables()?;
        Ok(StoreStats {
            samples_pending: tables.samples.values().filter(|s| !s.synced).count(),
            samples_total: tables.samples.len(),
            alerts_pending: tables.alerts.values().filter(|a| a.needs_sync()).count(),
            alerts_open: tables.alerts.values().filter(|a| !a.resolved).count(),
            assessments_pending: tables.assessments.values().filter(|a| !a.synced).count(),
            access_logs_pending: tables.access_logs.values().filter(|l| !l.synced).count(),
            policies: tables.policies.len(),
        })
    }
}
