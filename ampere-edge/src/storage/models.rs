use ampere_core::{
    AccessLogId, AccessLogReport, AlertReport, AssessmentId, CabinetId, EdgeAlertId, EdgeSeverity,
    PolicyDocument, SampleId, SensorReport,
};
use jiff::Timestamp;
use serde::Serialize;
use serde_json::Value;

/// A reading produced by a collector, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSample {
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub quality: u8,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSample {
    pub id: SampleId,
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub quality: u8,
    pub timestamp: Timestamp,
    pub synced: bool,
    pub synced_at: Option<Timestamp>,
}

impl SensorSample {
    pub fn to_report(&self) -> SensorReport {
        SensorReport {
            id: self.id,
            device_id: self.device_id.clone(),
            sensor_type: self.sensor_type.clone(),
            value: self.value,
            unit: self.unit.clone(),
            quality: self.quality,
            timestamp: self.timestamp,
        }
    }
}

/// A threshold breach observed for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCondition {
    pub device_id: String,
    pub alert_type: String,
    pub severity: EdgeSeverity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: Timestamp,
}

/// Edge copy of an alert. `revision` grows on every update so a sync that
/// read an older revision cannot mark a newer one as delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub id: EdgeAlertId,
    pub device_id: String,
    pub alert_type: String,
    pub severity: EdgeSeverity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: Timestamp,
    pub created_at: Timestamp,
    pub resolved: bool,
    pub resolved_at: Option<Timestamp>,
    pub synced_at: Option<Timestamp>,
    pub revision: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertVersion {
    pub id: EdgeAlertId,
    pub revision: i64,
}

impl AlertRecord {
    pub fn version(&self) -> AlertVersion {
        AlertVersion {
            id: self.id,
            revision: self.revision,
        }
    }

    /// True while the cloud has not seen the latest state of this alert.
    pub fn needs_sync(&self) -> bool {
        match (self.synced_at, self.resolved_at) {
            (None, _) => true,
            (Some(synced), Some(resolved)) => self.resolved && resolved > synced,
            (Some(_), None) => false,
        }
    }

    pub fn to_report(&self) -> AlertReport {
        AlertReport {
            alert_id: Some(self.id),
            device_id: self.device_id.clone(),
            alert_type: self.alert_type.clone(),
            severity: self.severity.into(),
            message: self.message.clone(),
            value: self.value,
            threshold: self.threshold,
            timestamp: self.timestamp,
            resolved: self.resolved,
            resolved_at: self.resolved_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAssessment {
    pub timestamp: Timestamp,
    pub license_compliance_score: f64,
    pub communication_score: f64,
    pub config_security_score: f64,
    pub data_anomaly_score: f64,
    pub overall_score: f64,
    pub risk_level: String,
    pub detected_vulnerabilities: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VulnerabilityAssessment {
    pub id: AssessmentId,
    pub timestamp: Timestamp,
    pub license_compliance_score: f64,
    pub communication_score: f64,
    pub config_security_score: f64,
    pub data_anomaly_score: f64,
    pub overall_score: f64,
    pub risk_level: String,
    pub detected_vulnerabilities: Value,
    pub synced: bool,
}

impl VulnerabilityAssessment {
    pub fn to_report(&self, cabinet_id: CabinetId) -> ampere_core::VulnerabilityReport {
        ampere_core::VulnerabilityReport {
            cabinet_id,
            assessment_id: self.id,
            timestamp: self.timestamp,
            license_compliance_score: self.license_compliance_score,
            communication_score: self.communication_score,
            config_security_score: self.config_security_score,
            data_anomaly_score: self.data_anomaly_score,
            overall_score: self.overall_score,
            risk_level: self.risk_level.clone(),
            detected_vulnerabilities: self.detected_vulnerabilities.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccessLog {
    pub subject_type: String,
    pub subject_id: String,
    pub action: String,
    pub resource: String,
    pub allowed: bool,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLog {
    pub id: AccessLogId,
    pub subject_type: String,
    pub subject_id: String,
    pub action: String,
    pub resource: String,
    pub allowed: bool,
    pub timestamp: Timestamp,
    pub synced: bool,
}

impl AccessLog {
    pub fn to_report(&self) -> AccessLogReport {
        AccessLogReport {
            id: self.id,
            subject_type: self.subject_type.clone(),
            subject_id: self.subject_id.clone(),
            action: self.action.clone(),
            resource: self.resource.clone(),
            allowed: self.allowed,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPolicy {
    pub policy: PolicyDocument,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub cabinet_id: CabinetId,
    pub api_key: String,
    pub endpoint: String,
    pub enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseState {
    pub token: String,
    pub applied_at: Timestamp,
    pub revoked_at: Option<Timestamp>,
}

impl LicenseState {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}
