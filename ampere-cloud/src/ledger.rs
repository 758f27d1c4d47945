//! Policy distribution with an audit trail.
//!
//! Every (policy, cabinet) push leaves a [`DistributionLogEntry`]. It starts
//! `pending`, becomes `failed` if the publish fails and `success` once the
//! cabinet acknowledges. Entries are never deleted.

use std::sync::Arc;
use std::time::Duration;

use ampere_bus::{BusError, MessageBus};
use ampere_core::{
    AckStatus, CabinetId, DistributionOperation, DistributionStatus, PolicyAck, PolicyAction,
    PolicyDocument, PolicyId, PolicySyncMessage, topic,
};
use jiff::Timestamp;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::registry::models::DistributionLogEntry;
use crate::registry::{CabinetRegistry, PolicyRegistry, Registries, RegistryError, boxed};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("policy {0} not found")]
    UnknownPolicy(PolicyId),
    #[error("policy {0} does not target devices")]
    NotDevicePolicy(PolicyId),
    #[error("cabinet {0} not found")]
    UnknownCabinet(CabinetId),
    #[error("no target cabinets")]
    NoTargets,
    #[error("distribution failed for all {total} targets: {error}")]
    AllFailed { total: usize, error: String },
    #[error("registry error: {0}")]
    Registry(RegistryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionFailure {
    pub cabinet_id: CabinetId,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistributionResult {
    pub success_count: usize,
    pub total: usize,
    pub failures: Vec<DistributionFailure>,
}

impl DistributionResult {
    fn into_checked(self) -> Result<Self, LedgerError> {
        if self.total > 0 && self.success_count == 0 {
            let error = self
                .failures
                .first()
                .map(|f| f.error.clone())
                .unwrap_or_default();
            return Err(LedgerError::AllFailed {
                total: self.total,
                error,
            });
        }
        Ok(self)
    }
}

#[derive(Clone)]
pub struct PolicyLedger<R> {
    registries: R,
    bus: Arc<dyn MessageBus>,
    publish_timeout: Duration,
}

impl<R: Registries> PolicyLedger<R> {
    pub fn new(registries: R, bus: Arc<dyn MessageBus>, publish_timeout: Duration) -> Self {
        Self {
            registries,
            bus,
            publish_timeout,
        }
    }

    pub async fn save(&self, policy: PolicyDocument) -> Result<(), LedgerError> {
        self.registries
            .policies()
            .save_policy(policy, Timestamp::now())
            .await
            .map_err(|e| LedgerError::Registry(boxed(e)))
    }

    async fn device_policy(&self, id: &PolicyId) -> Result<PolicyDocument, LedgerError> {
        let policy = self
            .registries
            .policies()
            .get_policy(id)
            .await
            .map_err(|e| LedgerError::Registry(boxed(e)))?
            .ok_or_else(|| LedgerError::UnknownPolicy(id.clone()))?;

        if !policy.targets_devices() {
            return Err(LedgerError::NotDevicePolicy(id.clone()));
        }
        Ok(policy)
    }

    /// Pushes one policy to the given cabinets.
    pub async fn distribute(
        &self,
        policy_id: &PolicyId,
        cabinets: &[CabinetId],
        operator: &str,
    ) -> Result<DistributionResult, LedgerError> {
        let policy = self.device_policy(policy_id).await?;
        if cabinets.is_empty() {
            return Err(LedgerError::NoTargets);
        }

        let mut result = DistributionResult {
            total: cabinets.len(),
            ..DistributionResult::default()
        };

        for cabinet in cabinets {
            let known = self
                .registries
                .cabinets()
                .get(cabinet)
                .await
                .map_err(|e| LedgerError::Registry(boxed(e)))?
                .is_some();
            if !known {
                let error = LedgerError::UnknownCabinet(cabinet.clone()).to_string();
                let mut entry = DistributionLogEntry::pending(
                    policy.id.clone(),
                    cabinet.clone(),
                    DistributionOperation::Distribute,
                    operator,
                    Timestamp::now(),
                );
                entry.status = DistributionStatus::Failed;
                entry.error_message = Some(error.clone());
                if let Err(e) = self.registries.policies().record_distribution(entry).await {
                    warn!(policy_id = %policy.id, cabinet_id = %cabinet, error = %e, "Failed to record policy distribution");
                }

                result.failures.push(DistributionFailure {
                    cabinet_id: cabinet.clone(),
                    error,
                });
                continue;
            }

            self.push(
                cabinet,
                std::slice::from_ref(&policy),
                PolicyAction::Sync,
                DistributionOperation::Distribute,
                operator,
                &mut result,
            )
            .await;
        }

        info!(
            policy_id = %policy_id,
            success_count = result.success_count,
            total = result.total,
            operator,
            "Policy distributed"
        );
        result.into_checked()
    }

    /// Pushes one policy to every registered cabinet.
    pub async fn broadcast(
        &self,
        policy_id: &PolicyId,
        operator: &str,
    ) -> Result<DistributionResult, LedgerError> {
        let policy = self.device_policy(policy_id).await?;
        let cabinets = self
            .registries
            .cabinets()
            .list()
            .await
            .map_err(|e| LedgerError::Registry(boxed(e)))?;

        let mut result = DistributionResult {
            total: cabinets.len(),
            ..DistributionResult::default()
        };

        for cabinet in &cabinets {
            self.push(
                &cabinet.id,
                std::slice::from_ref(&policy),
                PolicyAction::Sync,
                DistributionOperation::Broadcast,
                operator,
                &mut result,
            )
            .await;
        }

        info!(
            policy_id = %policy_id,
            success_count = result.success_count,
            total = result.total,
            operator,
            "Policy broadcast"
        );
        result.into_checked()
    }

    /// Replaces the cabinet's whole policy set with every device policy.
    pub async fn full_sync(
        &self,
        cabinet: &CabinetId,
        operator: &str,
    ) -> Result<DistributionResult, LedgerError> {
        let known = self
            .registries
            .cabinets()
            .get(cabinet)
            .await
            .map_err(|e| LedgerError::Registry(boxed(e)))?
            .is_some();
        if !known {
            return Err(LedgerError::UnknownCabinet(cabinet.clone()));
        }

        let policies = self
            .registries
            .policies()
            .device_policies()
            .await
            .map_err(|e| LedgerError::Registry(boxed(e)))?;

        let mut result = DistributionResult {
            total: policies.len(),
            ..DistributionResult::default()
        };
        self.push(
            cabinet,
            &policies,
            PolicyAction::FullSync,
            DistributionOperation::FullSync,
            operator,
            &mut result,
        )
        .await;

        info!(
            cabinet_id = %cabinet,
            policies = policies.len(),
            success_count = result.success_count,
            operator,
            "Policy full sync"
        );
        result.into_checked()
    }

    /// Logs one entry per policy, publishes a single message and settles the
    /// entries on failure.
    async fn push(
        &self,
        cabinet: &CabinetId,
        policies: &[PolicyDocument],
        action: PolicyAction,
        operation: DistributionOperation,
        operator: &str,
        result: &mut DistributionResult,
    ) {
        let now = Timestamp::now();
        let mut entries = Vec::with_capacity(policies.len());

        for policy in policies {
            let entry = DistributionLogEntry::pending(
                policy.id.clone(),
                cabinet.clone(),
                operation,
                operator,
                now,
            );
            match self.registries.policies().record_distribution(entry.clone()).await {
                Ok(()) => entries.push(entry),
                Err(e) => warn!(policy_id = %policy.id, cabinet_id = %cabinet, error = %e, "Failed to record policy distribution"),
            }
        }

        let message = PolicySyncMessage {
            action,
            policies: policies.to_vec(),
            policy_ids: Vec::new(),
            timestamp: now,
        };

        let sync_topic = topic::policy_sync(cabinet);
        let outcome = match tokio::time::timeout(
            self.publish_timeout,
            self.bus.publish_json(&sync_topic, &message),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(BusError::Timeout(self.publish_timeout)),
        };

        let pairs = match operation {
            DistributionOperation::FullSync => policies.len(),
            _ => 1,
        };

        match outcome {
            Ok(()) => {
                result.success_count += pairs;
                debug!(cabinet_id = %cabinet, policies = policies.len(), "Policy sync published");
            }
            Err(e) => {
                let error = e.to_string();
                warn!(cabinet_id = %cabinet, error, "Policy sync publish failed");

                for entry in &entries {
                    if let Err(e) = self
                        .registries
                        .policies()
                        .fail_distribution(entry.id, &error)
                        .await
                    {
                        warn!(distribution_id = %entry.id, error = %e, "Failed to record distribution failure");
                    }
                }
                result.failures.push(DistributionFailure {
                    cabinet_id: cabinet.clone(),
                    error,
                });
            }
        }
    }

    /// Applies an edge acknowledgment. Only successes change the ledger, and
    /// an ack that matches no pending entry is not an error.
    pub async fn handle_ack(
        &self,
        cabinet: &CabinetId,
        ack: &PolicyAck,
    ) -> Result<usize, LedgerError> {
        if ack.status != AckStatus::Success {
            debug!(policy_id = %ack.policy_id, cabinet_id = %cabinet, "Policy ack reports failure");
            return Ok(0);
        }

        let updated = self
            .registries
            .policies()
            .acknowledge(&ack.policy_id, cabinet, Timestamp::now())
            .await
            .map_err(|e| LedgerError::Registry(boxed(e)))?;

        debug!(policy_id = %ack.policy_id, cabinet_id = %cabinet, updated, "Policy acknowledged");
        Ok(updated)
    }

    pub async fn distributions(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Vec<DistributionLogEntry>, LedgerError> {
        self.registries
            .policies()
            .distributions_for(policy_id)
            .await
            .map_err(|e| LedgerError::Registry(boxed(e)))
    }
}
