use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ampere_bus::BusConfig;
use ampere_core::EdgeSeverity;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub cabinet: CabinetConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub bus: BusConfig,
    pub cloud: CloudConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub assessment: AssessmentConfig,
}

#[derive(Debug, Deserialize)]
pub struct CabinetConfig {
    /// Cabinet ID assigned at manufacture
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the local HTTP API to listen on
    pub http_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base URL of the control plane, e.g. `http://cloud:8080`
    pub endpoint: String,
    /// Used until credentials are stored locally
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bounded wait for a bus confirmation on the immediate push path
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
}

impl CloudConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Interval in seconds between readings
    #[serde(default = "default_collector_interval_secs")]
    pub interval_secs: u64,
    /// Number of simulated battery modules
    #[serde(default = "default_device_count")]
    pub device_count: usize,
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<ThresholdConfig>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_collector_interval_secs(),
            device_count: default_device_count(),
            thresholds: default_thresholds(),
        }
    }
}

/// Raises `alert_type` when a `sensor_type` reading leaves `[min, max]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThresholdConfig {
    pub sensor_type: String,
    pub alert_type: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    pub severity: EdgeSeverity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrafficConfig {
    #[serde(default = "default_traffic_interval_secs")]
    pub interval_secs: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_traffic_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssessmentConfig {
    #[serde(default = "default_assessment_interval_secs")]
    pub interval_secs: u64,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_assessment_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sync_interval_secs() -> u64 {
    180
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_interval_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_publish_timeout_secs() -> u64 {
    5
}

fn default_collector_interval_secs() -> u64 {
    10
}

fn default_device_count() -> usize {
    4
}

fn default_traffic_interval_secs() -> u64 {
    60
}

fn default_assessment_interval_secs() -> u64 {
    3600
}

fn default_thresholds() -> Vec<ThresholdConfig> {
    vec![
        ThresholdConfig {
            sensor_type: "temperature".into(),
            alert_type: "temperature_high".into(),
            min: None,
            max: Some(55.0),
            severity: EdgeSeverity::High,
        },
        ThresholdConfig {
            sensor_type: "voltage".into(),
            alert_type: "voltage_abnormal".into(),
            min: Some(3.0),
            max: Some(4.2),
            severity: EdgeSeverity::Medium,
        },
        ThresholdConfig {
            sensor_type: "soc".into(),
            alert_type: "soc_low".into(),
            min: Some(10.0),
            max: None,
            severity: EdgeSeverity::Low,
        },
    ]
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cabinet: CabinetConfig {
                id: "CAB-1".to_string(),
                name: None,
                location: None,
                ip_address: None,
            },
            server: ServerConfig {
                http_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 8081)),
            },
            storage: StorageConfig::Memory,
            bus: BusConfig::Disabled,
            cloud: CloudConfig {
                enabled: true,
                endpoint: "http://127.0.0.1:8080".to_string(),
                api_key: String::new(),
                sync_interval_secs: default_sync_interval_secs(),
                retry_count: default_retry_count(),
                retry_interval_secs: default_retry_interval_secs(),
                timeout_secs: default_timeout_secs(),
                publish_timeout_secs: default_publish_timeout_secs(),
            },
            collector: CollectorConfig::default(),
            traffic: TrafficConfig::default(),
            assessment: AssessmentConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [cabinet]
            id = "CAB-1"

            [server]
            http_addr = "127.0.0.1:8081"

            [storage]
            type = "sqlite"
            path = "/var/lib/ampere/edge.db"

            [bus]
            type = "mqtt"
            host = "broker"
            port = 1883
            client_id = "edge-CAB-1"

            [cloud]
            endpoint = "http://cloud:8080"
            api_key = "abcd1234efgh5678"
            "#,
        )
        .unwrap();

        assert!(config.cloud.enabled);
        assert_eq!(config.cloud.sync_interval(), Duration::from_secs(180));
        assert_eq!(config.cloud.retry_count, 3);
        assert!(matches!(config.storage, StorageConfig::Sqlite { .. }));
        assert!(matches!(config.bus, BusConfig::Mqtt(_)));
        assert_eq!(config.collector.thresholds.len(), 3);
    }

    #[test]
    fn thresholds_can_be_overridden() {
        let config: CollectorConfig = toml::from_str(
            r#"
            interval_secs = 1
            device_count = 1

            [[thresholds]]
            sensor_type = "temperature"
            alert_type = "temperature_high"
            max = 40.0
            severity = "critical"
            "#,
        )
        .unwrap();

        assert_eq!(config.thresholds.len(), 1);
        assert_eq!(config.thresholds[0].severity, EdgeSeverity::Critical);
        assert_eq!(config.thresholds[0].min, None);
    }
}
