//! Message-bus topic layout shared by both sides.

use crate::{CabinetId, CommandCategory};

pub const ALERTS_FILTER: &str = "edge/cabinet/+/alerts";
pub const ACCESS_LOGS_FILTER: &str = "edge/cabinet/+/abac/logs";
pub const POLICY_ACK_FILTER: &str = "edge/cabinet/+/policy/ack";
pub const COMMAND_RESPONSES_FILTER: &str = "control-plane/cabinets/+/responses/+";
pub const SENSORS_FILTER: &str = "sensors/#";
pub const TRAFFIC_FILTER: &str = "traffic/+";

pub fn commands(cabinet: &CabinetId, category: CommandCategory) -> String {
    format!("control-plane/cabinets/{cabinet}/commands/{}", category.as_str())
}

pub fn commands_filter(cabinet: &CabinetId) -> String {
    format!("control-plane/cabinets/{cabinet}/commands/+")
}

pub fn policy_sync(cabinet: &CabinetId) -> String {
    format!("control-plane/cabinets/{cabinet}/policy/sync")
}

pub fn command_response(cabinet: &CabinetId, command_id: &str) -> String {
    format!("control-plane/cabinets/{cabinet}/responses/{command_id}")
}

pub fn alerts(cabinet: &CabinetId) -> String {
    format!("edge/cabinet/{cabinet}/alerts")
}

pub fn access_logs(cabinet: &CabinetId) -> String {
    format!("edge/cabinet/{cabinet}/abac/logs")
}

pub fn policy_ack(cabinet: &CabinetId) -> String {
    format!("edge/cabinet/{cabinet}/policy/ack")
}

pub fn sensor(cabinet: &CabinetId, device_id: &str, sensor_type: &str) -> String {
    format!("sensors/{cabinet}/{device_id}/{sensor_type}")
}

pub fn traffic(cabinet: &CabinetId) -> String {
    format!("traffic/{cabinet}")
}

/// An upstream topic resolved to the cabinet that published on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream {
    Alerts(CabinetId),
    AccessLogs(CabinetId),
    PolicyAck(CabinetId),
    CommandResponse {
        cabinet: CabinetId,
        command_id: String,
    },
    Sensor {
        cabinet: CabinetId,
        device_id: String,
        sensor_type: String,
    },
    Traffic(CabinetId),
}

impl Upstream {
    pub fn cabinet(&self) -> &CabinetId {
        match self {
            Upstream::Alerts(c)
            | Upstream::AccessLogs(c)
            | Upstream::PolicyAck(c)
            | Upstream::Traffic(c) => c,
            Upstream::CommandResponse { cabinet, .. } | Upstream::Sensor { cabinet, .. } => cabinet,
        }
    }
}

/// Resolves an upstream topic. Unknown shapes return `None`.
pub fn parse_upstream(topic: &str) -> Option<Upstream> {
    let parts: Vec<&str> = topic.split('/').collect();

    match parts.as_slice() {
        ["edge", "cabinet", id, "alerts"] if !id.is_empty() => {
            Some(Upstream::Alerts(CabinetId::from(*id)))
        }
        ["edge", "cabinet", id, "abac", "logs"] if !id.is_empty() => {
            Some(Upstream::AccessLogs(CabinetId::from(*id)))
        }
        ["edge", "cabinet", id, "policy", "ack"] if !id.is_empty() => {
            Some(Upstream::PolicyAck(CabinetId::from(*id)))
        }
        ["control-plane", "cabinets", id, "responses", command_id]
            if !id.is_empty() && !command_id.is_empty() =>
        {
            Some(Upstream::CommandResponse {
                cabinet: CabinetId::from(*id),
                command_id: (*command_id).to_owned(),
            })
        }
        ["sensors", id, device_id, sensor_type] if !id.is_empty() => Some(Upstream::Sensor {
            cabinet: CabinetId::from(*id),
            device_id: (*device_id).to_owned(),
            sensor_type: (*sensor_type).to_owned(),
        }),
        ["traffic", id] if !id.is_empty() => Some(Upstream::Traffic(CabinetId::from(*id))),
        _ => None,
    }
}

/// MQTT topic filter matching with `+` (one level) and `#` (remaining levels).
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_downstream_topics() {
        let cab = CabinetId::from("CAB-1");
        assert_eq!(
            commands(&cab, CommandCategory::License),
            "control-plane/cabinets/CAB-1/commands/license"
        );
        assert_eq!(policy_sync(&cab), "control-plane/cabinets/CAB-1/policy/sync");
    }

    #[test]
    fn parses_upstream_topics() {
        assert_eq!(
            parse_upstream("edge/cabinet/CAB-1/alerts"),
            Some(Upstream::Alerts(CabinetId::from("CAB-1")))
        );
        assert_eq!(
            parse_upstream("edge/cabinet/CAB-1/policy/ack"),
            Some(Upstream::PolicyAck(CabinetId::from("CAB-1")))
        );
        assert_eq!(
            parse_upstream("control-plane/cabinets/CAB-2/responses/01J0"),
            Some(Upstream::CommandResponse {
                cabinet: CabinetId::from("CAB-2"),
                command_id: "01J0".to_owned(),
            })
        );
        assert_eq!(parse_upstream("edge/cabinet//alerts"), None);
        assert_eq!(parse_upstream("edge/cabinet/CAB-1/alerts/extra"), None);
    }

    #[test]
    fn wildcard_matching() {
        assert!(matches("sensors/#", "sensors/CAB-1/dev-7/temperature"));
        assert!(matches("edge/cabinet/+/alerts", "edge/cabinet/CAB-1/alerts"));
        assert!(!matches("edge/cabinet/+/alerts", "edge/cabinet/CAB-1/abac/logs"));
        assert!(matches(
            "control-plane/cabinets/CAB-1/commands/+",
            "control-plane/cabinets/CAB-1/commands/control"
        ));
        assert!(!matches("traffic/+", "traffic"));
    }
}
