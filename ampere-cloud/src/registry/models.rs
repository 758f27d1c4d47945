use ampere_core::{
    AlertId, AlertReport, CabinetId, CloudSeverity, CommandId, CommandStatus, CommandType,
    DistributionId, DistributionOperation, DistributionStatus, EdgeAlertId, PolicyId,
};
use jiff::Timestamp;
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cabinet {
    pub id: CabinetId,
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub location: Option<String>,
    pub ip_address: Option<String>,
    pub firmware_version: Option<String>,
    pub created_at: Timestamp,
    pub last_sync_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub id: CommandId,
    pub cabinet_id: CabinetId,
    pub command_type: CommandType,
    pub payload: Value,
    pub status: CommandStatus,
    pub result: Option<String>,
    pub created_by: String,
    pub created_at: Timestamp,
    pub sent_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl Command {
    pub fn new(
        cabinet_id: CabinetId,
        command_type: CommandType,
        payload: Value,
        created_by: impl Into<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            id: CommandId(ulid::Ulid::new()),
            cabinet_id,
            command_type,
            payload,
            status: CommandStatus::Pending,
            result: None,
            created_by: created_by.into(),
            created_at: at,
            sent_at: None,
            completed_at: None,
        }
    }
}

/// Cloud copy of an edge alert. There is one record per
/// `(cabinet_id, alert_type, device_id)`; an empty `device_id` stands for a
/// cabinet-level alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloudAlert {
    pub id: AlertId,
    pub cabinet_id: CabinetId,
    pub alert_type: String,
    pub device_id: String,
    pub severity: CloudSeverity,
    pub message: String,
    pub details: Value,
    pub edge_alert_id: Option<EdgeAlertId>,
    pub resolved: bool,
    pub resolved_at: Option<Timestamp>,
    pub resolved_by: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Free-form details carried on the cloud record.
pub fn alert_details(report: &AlertReport) -> Value {
    json!({
        "device_id": report.device_id,
        "sensor_value": report.value,
        "threshold": report.threshold,
    })
}

/// Who resolved an alert after applying `report` on top of `existing`.
pub fn resolver(report: &AlertReport, existing: Option<&CloudAlert>) -> Option<String> {
    if !report.resolved {
        return None;
    }

    match existing {
        Some(alert) if alert.resolved && alert.resolved_by.is_some() => alert.resolved_by.clone(),
        _ => Some("edge".to_owned()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertFilter {
    pub cabinet_id: Option<CabinetId>,
    pub include_resolved: bool,
}

impl AlertFilter {
    pub fn matches(&self, alert: &CloudAlert) -> bool {
        if let Some(cabinet) = &self.cabinet_id
            && &alert.cabinet_id != cabinet
        {
            return false;
        }

        self.include_resolved || !alert.resolved
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionLogEntry {
    pub id: DistributionId,
    pub policy_id: PolicyId,
    pub cabinet_id: CabinetId,
    pub operation: DistributionOperation,
    pub status: DistributionStatus,
    pub operator: String,
    pub error_message: Option<String>,
    pub distributed_at: Timestamp,
    pub acknowledged_at: Option<Timestamp>,
}

impl DistributionLogEntry {
    pub fn pending(
        policy_id: PolicyId,
        cabinet_id: CabinetId,
        operation: DistributionOperation,
        operator: impl Into<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            id: DistributionId(ulid::Ulid::new()),
            policy_id,
            cabinet_id,
            operation,
            status: DistributionStatus::Pending,
            operator: operator.into(),
            error_message: None,
            distributed_at: at,
            acknowledged_at: None,
        }
    }
}

/// Per-cabinet telemetry totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetryCounts {
    pub samples: usize,
    pub access_logs: usize,
    pub assessments: usize,
}
