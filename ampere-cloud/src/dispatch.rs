//! Command dispatch: persist, queue, publish, sweep.
//!
//! `send` never waits on the bus. It persists the command as `pending` and
//! hands it to a bounded queue drained by one supervised worker, which
//! publishes it and records `sent` or `failed`. Acknowledgments arrive
//! separately through [`crate::ack`]. Commands stuck at `sent` are moved to
//! `timeout` by [`run_timeout_sweep`]; nothing is ever republished.

use std::sync::Arc;
use std::time::Duration;

use ampere_bus::{BusError, MessageBus};
use ampere_core::{
    AlertId, CabinetId, CommandMessage, CommandStatus, CommandType, EdgeAlertId, topic,
};
use jiff::{SignedDuration, Timestamp};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::models::Command;
use crate::registry::{
    AlertRegistry, CabinetRegistry, CommandRegistry, Registries, RegistryError, boxed,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("cabinet {0} not found")]
    UnknownCabinet(CabinetId),
    #[error("unknown command type: {0}")]
    UnknownCommandType(String),
    #[error("license token must not be empty")]
    EmptyLicense,
    #[error("alert {0} not found")]
    UnknownAlert(AlertId),
    #[error("alert {0} is already resolved")]
    AlreadyResolved(AlertId),
    #[error("registry error: {0}")]
    Registry(RegistryError),
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub queue_capacity: usize,
    /// Bounded wait for the bus to confirm one publish.
    pub publish_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            publish_timeout: Duration::from_secs(5),
        }
    }
}

pub struct CommandDispatcher<R> {
    registries: R,
    queue: mpsc::Sender<Command>,
}

impl<R: Clone> Clone for CommandDispatcher<R> {
    fn clone(&self) -> Self {
        Self {
            registries: self.registries.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl<R: Registries> CommandDispatcher<R> {
    /// Starts the supervised publish worker. The returned handle completes
    /// once `cancel` fired and the queue is drained.
    pub fn spawn(
        registries: R,
        bus: Arc<dyn MessageBus>,
        settings: DispatchSettings,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let worker = Worker {
            registries: registries.clone(),
            bus,
            publish_timeout: settings.publish_timeout,
            queue: Arc::new(Mutex::new(rx)),
        };
        let handle = tokio::spawn(supervise(worker, cancel));

        (
            Self {
                registries,
                queue: tx,
            },
            handle,
        )
    }

    /// Persists a command and queues its publish. Returns the stored row
    /// without waiting for the bus.
    pub async fn send(
        &self,
        cabinet: &CabinetId,
        command_type: &str,
        payload: Value,
        created_by: &str,
    ) -> Result<Command, DispatchError> {
        let command_type = CommandType::parse(command_type)
            .ok_or_else(|| DispatchError::UnknownCommandType(command_type.to_owned()))?;

        let exists = self
            .registries
            .cabinets()
            .get(cabinet)
            .await
            .map_err(|e| DispatchError::Registry(boxed(e)))?
            .is_some();
        if !exists {
            return Err(DispatchError::UnknownCabinet(cabinet.clone()));
        }

        let mut command = Command::new(
            cabinet.clone(),
            command_type,
            payload,
            created_by,
            Timestamp::now(),
        );
        self.registries
            .commands()
            .insert(command.clone())
            .await
            .map_err(|e| DispatchError::Registry(boxed(e)))?;

        info!(
            command_id = %command.id,
            cabinet_id = %cabinet,
            command_type = command_type.as_str(),
            created_by,
            "Command created"
        );

        if let Err(e) = self.queue.try_send(command.clone()) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "dispatch queue full",
                mpsc::error::TrySendError::Closed(_) => "dispatcher stopped",
            };
            warn!(command_id = %command.id, reason, "Command not queued");

            let at = Timestamp::now();
            let moved = self
                .registries
                .commands()
                .transition(command.id, CommandStatus::Failed, Some(reason.to_owned()), at)
                .await
                .map_err(|e| DispatchError::Registry(boxed(e)))?;
            if moved {
                command.status = CommandStatus::Failed;
                command.result = Some(reason.to_owned());
                command.completed_at = Some(at);
            }
        }

        Ok(command)
    }

    pub async fn push_license(
        &self,
        cabinet: &CabinetId,
        license_token: &str,
        created_by: &str,
    ) -> Result<Command, DispatchError> {
        if license_token.trim().is_empty() {
            return Err(DispatchError::EmptyLicense);
        }

        self.send(
            cabinet,
            CommandType::LicensePush.as_str(),
            json!({ "license_token": license_token }),
            created_by,
        )
        .await
    }

    pub async fn revoke_license(
        &self,
        cabinet: &CabinetId,
        created_by: &str,
    ) -> Result<Command, DispatchError> {
        self.send(
            cabinet,
            CommandType::LicenseRevoke.as_str(),
            json!({}),
            created_by,
        )
        .await
    }

    /// Asks the owning edge to resolve its copy of the alert, then marks the
    /// cloud record resolved by `operator`. An alert whose edge id never
    /// arrived is resolved on the cloud only and no command is sent.
    pub async fn resolve_alert(
        &self,
        alert_id: AlertId,
        operator: &str,
    ) -> Result<Option<Command>, DispatchError> {
        let alert = self
            .registries
            .alerts()
            .get(alert_id)
            .await
            .map_err(|e| DispatchError::Registry(boxed(e)))?
            .ok_or(DispatchError::UnknownAlert(alert_id))?;

        if alert.resolved {
            return Err(DispatchError::AlreadyResolved(alert_id));
        }

        let command = match alert.edge_alert_id {
            Some(EdgeAlertId(edge_alert_id)) => Some(
                self.send(
                    &alert.cabinet_id,
                    CommandType::ResolveAlert.as_str(),
                    json!({ "alert_id": edge_alert_id, "device_id": alert.device_id }),
                    operator,
                )
                .await?,
            ),
            None => {
                warn!(alert_id = %alert_id, cabinet_id = %alert.cabinet_id, "Edge alert id missing, skipping edge sync");
                None
            }
        };

        let resolved = self
            .registries
            .alerts()
            .resolve(alert_id, operator, Timestamp::now())
            .await
            .map_err(|e| DispatchError::Registry(boxed(e)))?;
        if !resolved {
            debug!(alert_id = %alert_id, "Alert resolved concurrently");
        }

        Ok(command)
    }
}

struct Worker<R> {
    registries: R,
    bus: Arc<dyn MessageBus>,
    publish_timeout: Duration,
    queue: Arc<Mutex<mpsc::Receiver<Command>>>,
}

impl<R: Clone> Clone for Worker<R> {
    fn clone(&self) -> Self {
        Self {
            registries: self.registries.clone(),
            bus: Arc::clone(&self.bus),
            publish_timeout: self.publish_timeout,
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<R: Registries> Worker<R> {
    async fn run(self, cancel: CancellationToken) {
        let mut queue = self.queue.lock().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = queue.recv() => match command {
                    Some(command) => self.publish(command).await,
                    None => return,
                },
            }
        }

        queue.close();
        let mut drained = 0usize;
        while let Some(command) = queue.recv().await {
            self.publish(command).await;
            drained += 1;
        }
        info!(drained, "Dispatch worker stopped");
    }

    async fn publish(&self, command: Command) {
        let message = CommandMessage::new(
            command.id,
            command.command_type,
            command.payload,
            Timestamp::now(),
        );
        let topic = topic::commands(&command.cabinet_id, command.command_type.category());

        let outcome = match tokio::time::timeout(
            self.publish_timeout,
            self.bus.publish_json(&topic, &message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout(self.publish_timeout)),
        };

        let (status, result) = match outcome {
            Ok(()) => (CommandStatus::Sent, None),
            Err(e) => {
                warn!(command_id = %command.id, topic, error = %e, "Command publish failed");
                (CommandStatus::Failed, Some(format!("publish failed: {e}")))
            }
        };

        match self
            .registries
            .commands()
            .transition(command.id, status, result, Timestamp::now())
            .await
        {
            Ok(true) => debug!(command_id = %command.id, status = status.as_str(), topic, "Command published"),
            // An acknowledgment got there first
            Ok(false) => debug!(command_id = %command.id, "Command already past {}", status.as_str()),
            Err(e) => error!(command_id = %command.id, error = %e, "Failed to record publish outcome"),
        }
    }
}

async fn supervise<R: Registries>(worker: Worker<R>, cancel: CancellationToken) {
    info!("Dispatch worker started");

    loop {
        let handle = tokio::spawn(worker.clone().run(cancel.clone()));
        match handle.await {
            Ok(()) => break,
            Err(e) if e.is_panic() && !cancel.is_cancelled() => {
                error!(error = %e, "Dispatch worker panicked, restarting");
            }
            Err(e) => {
                error!(error = %e, "Dispatch worker ended abnormally");
                break;
            }
        }
    }
}

/// Moves commands that stayed `sent` longer than `command_timeout` to
/// `timeout`.
pub async fn run_timeout_sweep<C: CommandRegistry>(
    commands: C,
    command_timeout: SignedDuration,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        command_timeout_secs = command_timeout.as_secs(),
        interval_secs = interval.as_secs(),
        "Command timeout sweep started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Command timeout sweep shutting down");
                break;
            }
            _ = ticker.tick() => {
                let now = Timestamp::now();
                match commands.expire_sent(now - command_timeout, now).await {
                    Ok(expired) if expired.is_empty() => {}
                    Ok(expired) => {
                        for id in &expired {
                            warn!(command_id = %id, "Command timed out");
                        }
                        info!(count = expired.len(), "Expired unacknowledged commands");
                    }
                    Err(e) => error!(error = %e, "Command timeout sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ampere_bus::MemoryBus;

    use crate::registry::memory::InMemoryRegistries;
    use crate::registry::models::Cabinet;

    async fn registries_with_cabinet() -> InMemoryRegistries {
        let registries = InMemoryRegistries::new();
        registries
            .cabinets
            .register(Cabinet {
                id: "CAB-1".into(),
                name: None,
                api_key: "key-1".into(),
                location: None,
                ip_address: None,
                firmware_version: None,
                created_at: Timestamp::now(),
                last_sync_at: None,
            })
            .await
            .unwrap();
        registries
    }

    async fn wait_for_status(
        registries: &InMemoryRegistries,
        id: ampere_core::CommandId,
        status: CommandStatus,
    ) -> Command {
        for _ in 0..100 {
            let command = registries.commands.get(id).await.unwrap().unwrap();
            if command.status == status {
                return command;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("command {id} never reached {status:?}");
    }

    #[tokio::test]
    async fn send_publishes_on_category_topic() {
        let registries = registries_with_cabinet().await;
        let bus = MemoryBus::new();
        let mut rx = bus
            .subscribe("control-plane/cabinets/CAB-1/commands/+")
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let (dispatcher, _handle) = CommandDispatcher::spawn(
            registries.clone(),
            Arc::new(bus),
            DispatchSettings::default(),
            cancel.clone(),
        );

        let command = dispatcher
            .send(&"CAB-1".into(), "restart", json!({}), "operator")
            .await
            .unwrap();
        assert_eq!(command.status, CommandStatus::Pending);

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "control-plane/cabinets/CAB-1/commands/control");
        let body: CommandMessage = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(body.command_id, command.id.to_string());
        assert_eq!(body.command_type, "restart");

        let stored = wait_for_status(&registries, command.id, CommandStatus::Sent).await;
        assert!(stored.sent_at.is_some());
        cancel.cancel();
    }

    #[tokio::test]
    async fn offline_bus_fails_command() {
        let registries = registries_with_cabinet().await;
        let bus = MemoryBus::new();
        bus.set_online(false);
        let cancel = CancellationToken::new();
        let (dispatcher, _handle) = CommandDispatcher::spawn(
            registries.clone(),
            Arc::new(bus),
            DispatchSettings::default(),
            cancel.clone(),
        );

        let command = dispatcher
            .send(&"CAB-1".into(), "query_status", json!({}), "operator")
            .await
            .unwrap();

        let stored = wait_for_status(&registries, command.id, CommandStatus::Failed).await;
        assert!(stored.result.unwrap().starts_with("publish failed: "));
        cancel.cancel();
    }

    #[tokio::test]
    async fn send_rejects_unknown_cabinet_and_type() {
        let registries = registries_with_cabinet().await;
        let cancel = CancellationToken::new();
        let (dispatcher, _handle) = CommandDispatcher::spawn(
            registries.clone(),
            Arc::new(MemoryBus::new()),
            DispatchSettings::default(),
            cancel.clone(),
        );

        let err = dispatcher
            .send(&"CAB-9".into(), "restart", json!({}), "operator")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownCabinet(_)));

        let err = dispatcher
            .send(&"CAB-1".into(), "self_destruct", json!({}), "operator")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownCommandType(_)));
        cancel.cancel();
    }

    #[tokio::test]
    async fn full_queue_fails_the_command() {
        let registries = registries_with_cabinet().await;
        let (tx, _rx) = mpsc::channel(1);
        let dispatcher = CommandDispatcher {
            registries: registries.clone(),
            queue: tx,
        };

        let first = dispatcher
            .send(&"CAB-1".into(), "restart", json!({}), "operator")
            .await
            .unwrap();
        assert_eq!(first.status, CommandStatus::Pending);

        let second = dispatcher
            .send(&"CAB-1".into(), "restart", json!({}), "operator")
            .await
            .unwrap();
        assert_eq!(second.status, CommandStatus::Failed);
        assert_eq!(second.result.as_deref(), Some("dispatch queue full"));
    }

    #[tokio::test]
    async fn shutdown_drains_queued_commands() {
        let registries = registries_with_cabinet().await;
        let (tx, rx) = mpsc::channel(8);
        let dispatcher = CommandDispatcher {
            registries: registries.clone(),
            queue: tx,
        };

        let mut queued = Vec::new();
        for _ in 0..3 {
            let command = dispatcher
                .send(&"CAB-1".into(), "cache_clear", json!({}), "operator")
                .await
                .unwrap();
            queued.push(command.id);
        }

        // Cancelled before the worker ever runs
        let cancel = CancellationToken::new();
        cancel.cancel();
        let worker = Worker {
            registries: registries.clone(),
            bus: Arc::new(MemoryBus::new()),
            publish_timeout: Duration::from_secs(1),
            queue: Arc::new(Mutex::new(rx)),
        };
        supervise(worker, cancel).await;

        for id in queued {
            let stored = registries.commands.get(id).await.unwrap().unwrap();
            assert_eq!(stored.status, CommandStatus::Sent);
        }
    }

    #[tokio::test]
    async fn sweep_times_out_stale_sent_commands() {
        let registries = registries_with_cabinet().await;
        let stale = Command::new(
            "CAB-1".into(),
            CommandType::Restart,
            json!({}),
            "operator",
            Timestamp::now(),
        );
        registries.commands.insert(stale.clone()).await.unwrap();
        registries
            .commands
            .transition(
                stale.id,
                CommandStatus::Sent,
                None,
                Timestamp::now() - SignedDuration::from_secs(600),
            )
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let sweep = tokio::spawn(run_timeout_sweep(
            registries.commands.clone(),
            SignedDuration::from_secs(300),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        let stored = wait_for_status(&registries, stale.id, CommandStatus::Timeout).await;
        assert_eq!(stored.result.as_deref(), Some(crate::registry::TIMEOUT_RESULT));

        cancel.cancel();
        sweep.await.unwrap();
    }
}
