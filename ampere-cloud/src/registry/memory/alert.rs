use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use ampere_core::{AlertId, AlertReport, CabinetId};
use async_trait::async_trait;
use jiff::Timestamp;
use tokio::sync::RwLock;

use crate::registry::AlertRegistry;
use crate::registry::models::{AlertFilter, CloudAlert, alert_details, resolver};

type AlertKey = (CabinetId, String, String);

#[derive(Default)]
struct Alerts {
    by_id: HashMap<AlertId, CloudAlert>,
    by_key: HashMap<AlertKey, AlertId>,
}

#[derive(Clone, Default)]
pub struct InMemoryAlertRegistry {
    alerts: Arc<RwLock<Alerts>>,
}

#[async_trait]
impl AlertRegistry for InMemoryAlertRegistry {
    type Error = Infallible;

    async fn upsert(
        &self,
        cabinet: &CabinetId,
        report: &AlertReport,
        at: Timestamp,
    ) -> Result<CloudAlert, Self::Error> {
        let mut alerts = self.alerts.write().await;
        let key = (
            cabinet.clone(),
            report.alert_type.clone(),
            report.device_id.clone(),
        );

        if let Some(id) = alerts.by_key.get(&key).copied()
            && let Some(existing) = alerts.by_id.get_mut(&id)
        {
            let resolved_by = resolver(report, Some(existing));
            existing.severity = report.severity;
            existing.message = report.message.clone();
            existing.details = alert_details(report);
            existing.resolved = report.resolved;
            existing.resolved_at = if report.resolved {
                report.resolved_at.or(Some(at))
            } else {
                None
            };
            existing.resolved_by = resolved_by;
            if report.alert_id.is_some() {
                existing.edge_alert_id = report.alert_id;
            }
            existing.updated_at = at;
            return Ok(existing.clone());
        }

        let alert = CloudAlert {
            id: AlertId(ulid::Ulid::new()),
            cabinet_id: cabinet.clone(),
            alert_type: report.alert_type.clone(),
            device_id: report.device_id.clone(),
            severity: report.severity,
            message: report.message.clone(),
            details: alert_details(report),
            edge_alert_id: report.alert_id,
            resolved: report.resolved,
            resolved_at: if report.resolved {
                report.resolved_at.or(Some(at))
            } else {
                None
            },
            resolved_by: resolver(report, None),
            created_at: at,
            updated_at: at,
        };
        alerts.by_key.insert(key, alert.id);
        alerts.by_id.insert(alert.id, alert.clone());
        Ok(alert)
    }

    async fn get(&self, id: AlertId) -> Result<Option<CloudAlert>, Self::Error> {
        let alerts = self.alerts.read().await;
        Ok(alerts.by_id.get(&id).cloned())
    }

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<CloudAlert>, Self::Error> {
        let alerts = self.alerts.read().await;
        let mut matching: Vec<CloudAlert> = alerts
            .by_id
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(matching)
    }

    async fn resolve(&self, id: AlertId, by: &str, at: Timestamp) -> Result<bool, Self::Error> {
        let mut alerts = self.alerts.write().await;
        match alerts.by_id.get_mut(&id) {
            Some(alert) if !alert.resolved => {
                alert.resolved = true;
                alert.resolved_at = Some(at);
                alert.resolved_by = Some(by.to_owned());
                alert.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
