use std::sync::Arc;
use std::time::Duration;

use ampere_bus::MessageBus;
use jiff::Timestamp;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::credentials::CredentialProvider;
use crate::storage::EdgeStore;
use crate::storage::models::{NewAssessment, VulnerabilityAssessment};

pub fn risk_level(overall: f64) -> &'static str {
    match overall {
        s if s >= 80.0 => "low",
        s if s >= 60.0 => "medium",
        s if s >= 40.0 => "high",
        _ => "critical",
    }
}

/// Scores the cabinet's security posture from local signals.
pub struct Assessor<S> {
    store: S,
    bus: Arc<dyn MessageBus>,
    credentials: CredentialProvider<S>,
}

impl<S: EdgeStore> Assessor<S> {
    pub fn new(store: S, bus: Arc<dyn MessageBus>, credentials: CredentialProvider<S>) -> Self {
        Self {
            store,
            bus,
            credentials,
        }
    }

    pub async fn assess(&self) -> Result<VulnerabilityAssessment, S::Error> {
        let mut findings = Vec::new();

        let license_compliance_score = match self.store.current_license().await? {
            Some(license) if license.is_active() => 100.0,
            Some(_) => {
                findings.push(json!({"type": "license_revoked", "severity": "high"}));
                30.0
            }
            None => {
                findings.push(json!({"type": "license_missing", "severity": "medium"}));
                50.0
            }
        };

        let stats = self.bus.stats();
        let mut communication_score = stats.success_rate() * 100.0;
        if !self.bus.is_connected() {
            findings.push(json!({"type": "bus_disconnected", "severity": "medium"}));
            communication_score = communication_score.min(50.0);
        }

        let credentials = self.credentials.current().await;
        let config_security_score = if credentials.api_key.is_empty() {
            findings.push(json!({"type": "missing_api_key", "severity": "high"}));
            40.0
        } else if credentials.endpoint.starts_with("http://") {
            findings.push(json!({"type": "plaintext_endpoint", "severity": "low"}));
            80.0
        } else {
            100.0
        };

        let open_alerts = self.store.stats().await?.alerts_open;
        let data_anomaly_score = (100.0 - 10.0 * open_alerts as f64).max(0.0);
        if open_alerts > 0 {
            findings.push(json!({"type": "open_alerts", "count": open_alerts}));
        }

        let overall_score = (license_compliance_score
            + communication_score
            + config_security_score
            + data_anomaly_score)
            / 4.0;

        self.store
            .insert_assessment(NewAssessment {
                timestamp: Timestamp::now(),
                license_compliance_score,
                communication_score,
                config_security_score,
                data_anomaly_score,
                overall_score,
                risk_level: risk_level(overall_score).to_owned(),
                detected_vulnerabilities: findings.into(),
            })
            .await
    }
}

pub async fn run_assessor<S: EdgeStore>(
    assessor: Assessor<S>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "Assessor started");
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Assessor shutting down");
                break;
            }
            _ = ticker.tick() => {
                match assessor.assess().await {
                    Ok(a) => info!(overall = a.overall_score, risk_level = %a.risk_level, "Assessment recorded"),
                    Err(e) => error!(error = %e, "Assessment failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use crate::storage::memory::MemoryStore;
    use ampere_bus::MemoryBus;

    #[tokio::test]
    async fn missing_license_and_key_lower_the_score() {
        let store = MemoryStore::new();
        let credentials = CredentialProvider::new(
            store.clone(),
            Credentials {
                cabinet_id: "CAB-1".into(),
                api_key: String::new(),
                endpoint: "https://cloud".into(),
            },
        );
        let assessor = Assessor::new(store.clone(), Arc::new(MemoryBus::new()), credentials);

        let assessment = assessor.assess().await.unwrap();
        assert_eq!(assessment.license_compliance_score, 50.0);
        assert_eq!(assessment.config_security_score, 40.0);
        assert_eq!(assessment.overall_score, 72.5);
        assert_eq!(assessment.risk_level, "medium");
        assert_eq!(store.unsynced_assessments(10).await.unwrap().len(), 1);
    }

    #[test]
    fn risk_bands() {
        assert_eq!(risk_level(95.0), "low");
        assert_eq!(risk_level(60.0), "medium");
        assert_eq!(risk_level(41.0), "high");
        assert_eq!(risk_level(10.0), "critical");
    }
}
