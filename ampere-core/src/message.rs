//! JSON bodies exchanged over the bus and the HTTP fallback.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    AccessLogId, AssessmentId, CabinetId, CloudSeverity, CommandId, CommandType, EdgeAlertId,
    PolicyId, SampleId,
};

/// Downstream command body. `command_type` stays a string so an edge can log
/// and drop types it does not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    #[serde(default)]
    pub command_id: String,
    pub command_type: String,
    #[serde(default)]
    pub payload: Value,
    /// Unix seconds.
    pub timestamp: i64,
}

impl CommandMessage {
    pub fn new(id: CommandId, command_type: CommandType, payload: Value, at: Timestamp) -> Self {
        Self {
            command_id: id.to_string(),
            command_type: command_type.as_str().to_owned(),
            payload,
            timestamp: at.as_second(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Failed,
}

/// Outcome of one command as reported by the edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    pub command_id: String,
    pub status: AckStatus,
    #[serde(default)]
    pub message: String,
}

impl CommandAck {
    pub fn success(command_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            status: AckStatus::Success,
            message: message.into(),
        }
    }

    pub fn failed(command_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            status: AckStatus::Failed,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAck {
    pub policy_id: PolicyId,
    pub status: AckStatus,
}

/// One alert as delivered upstream, on either transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertReport {
    #[serde(default, alias = "id")]
    pub alert_id: Option<EdgeAlertId>,
    #[serde(default)]
    pub device_id: String,
    pub alert_type: String,
    pub severity: CloudSeverity,
    pub message: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub threshold: f64,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub resolved_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReport {
    pub id: SampleId,
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub quality: u8,
    pub timestamp: Timestamp,
}

/// Body of `POST /cabinets/{id}/sync` and `POST /cabinets/{id}/alerts/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub cabinet_id: CabinetId,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub sensor_data: Vec<SensorReport>,
    #[serde(default)]
    pub alerts: Vec<AlertReport>,
}

/// Body of `PUT /cabinets/{id}/sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CabinetMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
}

/// Body of `POST /cabinets/{id}/vulnerability/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityReport {
    pub cabinet_id: CabinetId,
    pub assessment_id: AssessmentId,
    pub timestamp: Timestamp,
    pub license_compliance_score: f64,
    pub communication_score: f64,
    pub config_security_score: f64,
    pub data_anomaly_score: f64,
    pub overall_score: f64,
    pub risk_level: String,
    #[serde(default)]
    pub detected_vulnerabilities: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogReport {
    pub id: AccessLogId,
    pub subject_type: String,
    pub subject_id: String,
    pub action: String,
    pub resource: String,
    pub allowed: bool,
    pub timestamp: Timestamp,
}

impl AccessLogReport {
    /// Entries produced by the built-in administrator are not worth keeping.
    pub fn is_system_principal(&self) -> bool {
        self.subject_type == "user" && self.subject_id == "admin"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogBatch {
    pub cabinet_id: CabinetId,
    pub logs: Vec<AccessLogReport>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub id: PolicyId,
    pub name: String,
    pub subject_type: String,
    #[serde(default)]
    pub document: Value,
}

impl PolicyDocument {
    pub fn targets_devices(&self) -> bool {
        self.subject_type == "device"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Sync,
    Delete,
    FullSync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySyncMessage {
    pub action: PolicyAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicyDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_ids: Vec<PolicyId>,
    pub timestamp: Timestamp,
}

/// Link-quality sample published on `traffic/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficReport {
    pub cabinet_id: CabinetId,
    pub timestamp: Timestamp,
    pub throughput_kbps: f64,
    pub latency_ms: f64,
    pub packet_loss_rate: f64,
    pub mqtt_success_rate: f64,
    pub reconnection_count: u32,
    pub risk_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_message_uses_unix_seconds() {
        let at = Timestamp::from_second(1_700_000_000).unwrap();
        let id = CommandId(ulid::Ulid::nil());
        let msg = CommandMessage::new(id, CommandType::ResolveAlert, serde_json::json!({}), at);

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000);
        assert_eq!(json["command_type"], "resolve_alert");
    }

    #[test]
    fn alert_report_accepts_batch_id_alias() {
        let json = r#"{
            "id": 42,
            "device_id": "dev-7",
            "alert_type": "temperature_high",
            "severity": "error",
            "message": "too hot",
            "timestamp": "2024-05-01T10:00:00Z"
        }"#;

        let report: AlertReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.alert_id, Some(EdgeAlertId(42)));
        assert!(!report.resolved);
        assert_eq!(report.resolved_at, None);
    }

    #[test]
    fn admin_user_is_the_system_principal() {
        let mut log = AccessLogReport {
            id: AccessLogId(1),
            subject_type: "user".into(),
            subject_id: "admin".into(),
            action: "read".into(),
            resource: "bms".into(),
            allowed: true,
            timestamp: Timestamp::UNIX_EPOCH,
        };
        assert!(log.is_system_principal());

        log.subject_type = "device".into();
        assert!(!log.is_system_principal());
    }
}
