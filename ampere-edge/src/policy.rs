use std::sync::Arc;

use ampere_bus::{BusMessage, MessageBus};
use ampere_core::{
    AckStatus, CabinetId, PolicyAck, PolicyAction, PolicyId, PolicySyncMessage, topic,
};
use jiff::Timestamp;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::storage::EdgeStore;

/// Applies policy pushes from the control plane and acknowledges each policy.
pub struct PolicySync<S> {
    store: S,
    bus: Arc<dyn MessageBus>,
    ack_topic: String,
}

impl<S: EdgeStore> PolicySync<S> {
    pub fn new(store: S, bus: Arc<dyn MessageBus>, cabinet: &CabinetId) -> Self {
        Self {
            store,
            bus,
            ack_topic: topic::policy_ack(cabinet),
        }
    }

    pub async fn handle(&self, payload: &[u8]) {
        let message: PolicySyncMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Failed to parse policy sync message, dropping");
                return;
            }
        };

        let now = Timestamp::now();
        match message.action {
            PolicyAction::Sync => {
                for policy in message.policies {
                    if !policy.targets_devices() {
                        warn!(policy_id = %policy.id, subject_type = %policy.subject_type, "Ignoring non-device policy");
                        continue;
                    }
                    let id = policy.id.clone();
                    let status = self.save(policy, now).await;
                    self.ack(id, status).await;
                }
            }
            PolicyAction::Delete => {
                for id in &message.policy_ids {
                    match self.store.delete_policy(id).await {
                        Ok(removed) => info!(policy_id = %id, removed, "Policy deleted"),
                        Err(e) => error!(policy_id = %id, error = %e, "Failed to delete policy"),
                    }
                }
            }
            PolicyAction::FullSync => {
                if let Err(e) = self.store.clear_policies().await {
                    error!(error = %e, "Failed to clear policies before full sync");
                    return;
                }

                let total = message.policies.len();
                for policy in message.policies {
                    let id = policy.id.clone();
                    let status = self.save(policy, now).await;
                    self.ack(id, status).await;
                }
                info!(total, "Policy full sync applied");
            }
        }
    }

    async fn save(&self, policy: ampere_core::PolicyDocument, at: Timestamp) -> AckStatus {
        let id = policy.id.clone();
        match self.store.save_policy(policy, at).await {
            Ok(()) => {
                info!(policy_id = %id, "Policy saved");
                AckStatus::Success
            }
            Err(e) => {
                error!(policy_id = %id, error = %e, "Failed to save policy");
                AckStatus::Failed
            }
        }
    }

    async fn ack(&self, policy_id: PolicyId, status: AckStatus) {
        let ack = PolicyAck { policy_id, status };
        if let Err(e) = self.bus.publish_json(&self.ack_topic, &ack).await {
            warn!(policy_id = %ack.policy_id, error = %e, "Failed to publish policy ack");
        }
    }
}

pub async fn run_policy_loop<S: EdgeStore>(
    sync: PolicySync<S>,
    mut messages: mpsc::Receiver<BusMessage>,
    cancel: CancellationToken,
) {
    info!("Policy sync handler started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Policy sync handler shutting down");
                break;
            }
            message = messages.recv() => {
                let Some(message) = message else {
                    warn!("Policy subscription closed");
                    break;
                };
                sync.handle(&message.payload).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use ampere_bus::MemoryBus;
    use ampere_core::PolicyDocument;
    use serde_json::json;

    fn policy(id: &str) -> PolicyDocument {
        PolicyDocument {
            id: id.into(),
            name: format!("policy {id}"),
            subject_type: "device".into(),
            document: json!({"effect": "allow"}),
        }
    }

    fn message(action: PolicyAction, policies: Vec<PolicyDocument>, ids: Vec<PolicyId>) -> Vec<u8> {
        serde_json::to_vec(&PolicySyncMessage {
            action,
            policies,
            policy_ids: ids,
            timestamp: Timestamp::now(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn sync_saves_and_acks_each_policy() {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        let sync = PolicySync::new(store.clone(), Arc::new(bus.clone()), &"CAB-1".into());

        sync.handle(&message(
            PolicyAction::Sync,
            vec![policy("p1"), policy("p2")],
            vec![],
        ))
        .await;

        assert_eq!(store.list_policies().await.unwrap().len(), 2);
        let acks = bus.published_on("edge/cabinet/CAB-1/policy/ack");
        assert_eq!(acks.len(), 2);
        let ack: PolicyAck = serde_json::from_slice(&acks[0].payload).unwrap();
        assert_eq!(ack.status, AckStatus::Success);
    }

    #[tokio::test]
    async fn full_sync_replaces_everything() {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        let sync = PolicySync::new(store.clone(), Arc::new(bus), &"CAB-1".into());

        sync.handle(&message(PolicyAction::Sync, vec![policy("old")], vec![]))
            .await;
        sync.handle(&message(
            PolicyAction::FullSync,
            vec![policy("a"), policy("b")],
            vec![],
        ))
        .await;

        let ids: Vec<_> = store
            .list_policies()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.policy.id)
            .collect();
        assert_eq!(ids, vec![PolicyId::from("a"), PolicyId::from("b")]);
    }

    #[tokio::test]
    async fn delete_removes_listed_ids() {
        let store = MemoryStore::new();
        let sync = PolicySync::new(store.clone(), Arc::new(MemoryBus::new()), &"CAB-1".into());

        sync.handle(&message(PolicyAction::Sync, vec![policy("p1"), policy("p2")], vec![]))
            .await;
        sync.handle(&message(PolicyAction::Delete, vec![], vec!["p1".into()]))
            .await;

        let remaining = store.list_policies().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].policy.id.as_str(), "p2");
    }
}
