use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every command type the control plane may issue to a cabinet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    ConfigUpdate,
    ConfigPush,
    Config,
    LicensePush,
    LicenseRevoke,
    LicenseUpdate,
    License,
    QueryStatus,
    QueryLogs,
    Query,
    Restart,
    ModeSwitch,
    CacheClear,
    ResolveAlert,
    Control,
}

/// Topic suffix a command is published under. Edges subscribe per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCategory {
    Config,
    License,
    Query,
    Control,
}

impl CommandType {
    pub const ALL: [CommandType; 15] = [
        CommandType::ConfigUpdate,
        CommandType::ConfigPush,
        CommandType::Config,
        CommandType::LicensePush,
        CommandType::LicenseRevoke,
        CommandType::LicenseUpdate,
        CommandType::License,
        CommandType::QueryStatus,
        CommandType::QueryLogs,
        CommandType::Query,
        CommandType::Restart,
        CommandType::ModeSwitch,
        CommandType::CacheClear,
        CommandType::ResolveAlert,
        CommandType::Control,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::ConfigUpdate => "config_update",
            CommandType::ConfigPush => "config_push",
            CommandType::Config => "config",
            CommandType::LicensePush => "license_push",
            CommandType::LicenseRevoke => "license_revoke",
            CommandType::LicenseUpdate => "license_update",
            CommandType::License => "license",
            CommandType::QueryStatus => "query_status",
            CommandType::QueryLogs => "query_logs",
            CommandType::Query => "query",
            CommandType::Restart => "restart",
            CommandType::ModeSwitch => "mode_switch",
            CommandType::CacheClear => "cache_clear",
            CommandType::ResolveAlert => "resolve_alert",
            CommandType::Control => "control",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    pub fn category(self) -> CommandCategory {
        match self {
            CommandType::ConfigUpdate | CommandType::ConfigPush | CommandType::Config => {
                CommandCategory::Config
            }
            CommandType::LicensePush
            | CommandType::LicenseRevoke
            | CommandType::LicenseUpdate
            | CommandType::License => CommandCategory::License,
            CommandType::QueryStatus | CommandType::QueryLogs | CommandType::Query => {
                CommandCategory::Query
            }
            CommandType::Restart
            | CommandType::ModeSwitch
            | CommandType::CacheClear
            | CommandType::ResolveAlert
            | CommandType::Control => CommandCategory::Control,
        }
    }
}

impl CommandCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandCategory::Config => "config",
            CommandCategory::License => "license",
            CommandCategory::Query => "query",
            CommandCategory::Control => "control",
        }
    }
}

/// Lifecycle of a command as tracked by the control plane.
///
/// ```text
/// pending ──► sent ──► success | failed | timeout
///    │                    ▲
///    └────────────────────┘  (ack overtaking the sent write, or publish failure)
/// ```
///
/// `success`, `failed` and `timeout` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Sent,
    Success,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal command transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: CommandStatus,
    pub to: CommandStatus,
}

impl CommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Sent => "sent",
            CommandStatus::Success => "success",
            CommandStatus::Failed => "failed",
            CommandStatus::Timeout => "timeout",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(CommandStatus::Pending),
            "sent" => Some(CommandStatus::Sent),
            "success" => Some(CommandStatus::Success),
            "failed" => Some(CommandStatus::Failed),
            "timeout" => Some(CommandStatus::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Success | CommandStatus::Failed | CommandStatus::Timeout
        )
    }

    /// States a command may be in for a move into `self` to be legal.
    /// Registries use this for their conditional updates.
    pub fn predecessors(self) -> &'static [CommandStatus] {
        match self {
            CommandStatus::Pending => &[],
            CommandStatus::Sent => &[CommandStatus::Pending],
            CommandStatus::Success | CommandStatus::Failed => {
                &[CommandStatus::Pending, CommandStatus::Sent]
            }
            CommandStatus::Timeout => &[CommandStatus::Sent],
        }
    }

    pub fn can_transition(self, to: CommandStatus) -> bool {
        to.predecessors().contains(&self)
    }

    pub fn transition(self, to: CommandStatus) -> Result<CommandStatus, TransitionError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(TransitionError { from: self, to })
        }
    }
}
