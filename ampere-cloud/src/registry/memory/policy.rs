use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use ampere_core::{CabinetId, DistributionId, DistributionStatus, PolicyDocument, PolicyId};
use async_trait::async_trait;
use jiff::Timestamp;
use tokio::sync::RwLock;

use crate::registry::PolicyRegistry;
use crate::registry::models::DistributionLogEntry;

#[derive(Default)]
struct Ledger {
    policies: BTreeMap<PolicyId, PolicyDocument>,
    // Insertion order is the audit order
    distributions: Vec<DistributionLogEntry>,
}

#[derive(Clone, Default)]
pub struct InMemoryPolicyRegistry {
    ledger: Arc<RwLock<Ledger>>,
}

#[async_trait]
impl PolicyRegistry for InMemoryPolicyRegistry {
    type Error = Infallible;

    async fn save_policy(
        &self,
        policy: PolicyDocument,
        _at: Timestamp,
    ) -> Result<(), Self::Error> {
        let mut ledger = self.ledger.write().await;
        ledger.policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    async fn get_policy(&self, id: &PolicyId) -> Result<Option<PolicyDocument>, Self::Error> {
        let ledger = self.ledger.read().await;
        Ok(ledger.policies.get(id).cloned())
    }

    async fn device_policies(&self) -> Result<Vec<PolicyDocument>, Self::Error> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .policies
            .values()
            .filter(|p| p.targets_devices())
            .cloned()
            .collect())
    }

    async fn record_distribution(&self, entry: DistributionLogEntry) -> Result<(), Self::Error> {
        let mut ledger = self.ledger.write().await;
        ledger.distributions.push(entry);
        Ok(())
    }

    async fn fail_distribution(
        &self,
        id: DistributionId,
        error: &str,
    ) -> Result<(), Self::Error> {
        let mut ledger = self.ledger.write().await;
        if let Some(entry) = ledger.distributions.iter_mut().find(|e| e.id == id) {
            entry.status = DistributionStatus::Failed;
            entry.error_message = Some(error.to_owned());
        }
        Ok(())
    }

    async fn acknowledge(
        &self,
        policy: &PolicyId,
        cabinet: &CabinetId,
        at: Timestamp,
    ) -> Result<usize, Self::Error> {
        let mut ledger = self.ledger.write().await;
        let mut updated = 0;

        for entry in ledger.distributions.iter_mut().filter(|e| {
            &e.policy_id == policy
                && &e.cabinet_id == cabinet
                && e.status == DistributionStatus::Pending
        }) {
            entry.status = DistributionStatus::Success;
            entry.acknowledged_at = Some(at);
            updated += 1;
        }

        Ok(updated)
    }

    async fn distributions_for(
        &self,
        policy: &PolicyId,
    ) -> Result<Vec<DistributionLogEntry>, Self::Error> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .distributions
            .iter()
            .filter(|e| &e.policy_id == policy)
            .cloned()
            .collect())
    }
}
