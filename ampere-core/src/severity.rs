use serde::{Deserialize, Serialize};

/// Severity scale used by edge thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Severity scale used by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl EdgeSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeSeverity::Low => "low",
            EdgeSeverity::Medium => "medium",
            EdgeSeverity::High => "high",
            EdgeSeverity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(EdgeSeverity::Low),
            "medium" => Some(EdgeSeverity::Medium),
            "high" => Some(EdgeSeverity::High),
            "critical" => Some(EdgeSeverity::Critical),
            _ => None,
        }
    }
}

impl CloudSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            CloudSeverity::Info => "info",
            CloudSeverity::Warning => "warning",
            CloudSeverity::Error => "error",
            CloudSeverity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "info" => Some(CloudSeverity::Info),
            "warning" => Some(CloudSeverity::Warning),
            "error" => Some(CloudSeverity::Error),
            "critical" => Some(CloudSeverity::Critical),
            _ => None,
        }
    }
}

impl From<EdgeSeverity> for CloudSeverity {
    fn from(value: EdgeSeverity) -> Self {
        match value {
            EdgeSeverity::Low => CloudSeverity::Info,
            EdgeSeverity::Medium => CloudSeverity::Warning,
            EdgeSeverity::High => CloudSeverity::Error,
            EdgeSeverity::Critical => CloudSeverity::Critical,
        }
    }
}
