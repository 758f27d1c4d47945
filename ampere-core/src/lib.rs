pub mod command;
pub mod message;
pub mod severity;
pub mod topic;

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use command::{CommandCategory, CommandStatus, CommandType, TransitionError};
pub use message::{
    AccessLogBatch, AccessLogReport, AckStatus, AlertReport, CabinetMetadata, CommandAck,
    CommandMessage, PolicyAck, PolicyAction, PolicyDocument, PolicySyncMessage, SensorReport,
    SyncPayload, TrafficReport, VulnerabilityReport,
};
pub use severity::{CloudSeverity, EdgeSeverity};

// `Box<str>` keeps identifiers compact and makes accidental growth impossible.
pub type BoxStr = Box<str>;

/// Identifier of a physical cabinet, assigned at manufacture (e.g. `CAB-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CabinetId(pub BoxStr);

/// Cloud-generated identifier of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub Ulid);

/// Cloud-side identifier of an alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub Ulid);

/// Edge-local identifier of an alert record. Cloud keeps it as a back-reference
/// so resolution commands can address the edge copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeAlertId(pub i64);

/// Edge-local identifier of a sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(pub i64);

/// Edge-local identifier of a vulnerability assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssessmentId(pub i64);

/// Edge-local identifier of an access log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessLogId(pub i64);

/// Identifier of an access policy document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(pub BoxStr);

/// Identifier of one policy distribution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DistributionId(pub Ulid);

impl CabinetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PolicyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CabinetId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<&str> for PolicyId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for CabinetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for EdgeAlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for DistributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Distribution status of one policy push to one cabinet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Pending,
    Success,
    Failed,
}

/// How a policy push was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionOperation {
    Distribute,
    Broadcast,
    FullSync,
}

impl DistributionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DistributionStatus::Pending => "pending",
            DistributionStatus::Success => "success",
            DistributionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(DistributionStatus::Pending),
            "success" => Some(DistributionStatus::Success),
            "failed" => Some(DistributionStatus::Failed),
            _ => None,
        }
    }
}

impl DistributionOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            DistributionOperation::Distribute => "distribute",
            DistributionOperation::Broadcast => "broadcast",
            DistributionOperation::FullSync => "full_sync",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "distribute" => Some(DistributionOperation::Distribute),
            "broadcast" => Some(DistributionOperation::Broadcast),
            "full_sync" => Some(DistributionOperation::FullSync),
            _ => None,
        }
    }
}

/// Masks an API key for logs and local API responses.
pub fn mask_api_key(key: &str) -> String {
    if key.chars().count() <= 8 {
        return "***".to_owned();
    }

    let head: String = key.chars().take(4).collect();
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    format!("{head}****{tail}")
}
