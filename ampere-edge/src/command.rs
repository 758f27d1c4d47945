use std::sync::Arc;
use std::time::Duration;

use ampere_bus::{BusMessage, Delivery, DeliveryError, Fallback, MessageBus};
use ampere_core::{CabinetId, CommandAck, CommandMessage, CommandType, EdgeAlertId, topic};
use async_trait::async_trait;
use jiff::Timestamp;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cloud::CloudClient;
use crate::license::LicenseService;
use crate::push::BusDelivery;
use crate::state::EdgeState;
use crate::storage::EdgeStore;

/// Runs commands received from the control plane.
pub struct CommandExecutor<S> {
    store: S,
    license: Option<Arc<dyn LicenseService>>,
    state: EdgeState,
}

impl<S: EdgeStore> CommandExecutor<S> {
    pub fn new(store: S, license: Option<Arc<dyn LicenseService>>, state: EdgeState) -> Self {
        Self {
            store,
            license,
            state,
        }
    }

    /// Parses and executes one command body. Returns the acknowledgment to
    /// send, or `None` when the command must be dropped silently.
    pub async fn handle(&self, payload: &[u8]) -> Option<CommandAck> {
        let command: CommandMessage = match serde_json::from_slice(payload) {
            Ok(command) => command,
            Err(e) => {
                error!(error = %e, "Failed to parse command, dropping");
                return None;
            }
        };

        info!(
            command_id = %command.command_id,
            command_type = %command.command_type,
            timestamp = command.timestamp,
            "Received command"
        );

        let Some(outcome) = self.execute(&command).await else {
            warn!(command_type = %command.command_type, "Unknown command type, dropping");
            return None;
        };

        self.state.command_executed().await;

        let ack = match outcome {
            Ok(message) => CommandAck::success(&command.command_id, message),
            Err(message) => {
                warn!(command_id = %command.command_id, reason = %message, "Command failed");
                CommandAck::failed(&command.command_id, message)
            }
        };

        if ack.command_id.is_empty() {
            return None;
        }
        Some(ack)
    }

    async fn execute(&self, command: &CommandMessage) -> Option<Result<String, String>> {
        let outcome = match CommandType::parse(&command.command_type)? {
            CommandType::LicensePush | CommandType::LicenseUpdate => {
                self.apply_license(command).await
            }
            CommandType::LicenseRevoke => self.revoke_license().await,
            CommandType::ResolveAlert => self.resolve_alert(command).await,
            _ => return None,
        };
        Some(outcome)
    }

    async fn apply_license(&self, command: &CommandMessage) -> Result<String, String> {
        let license = self
            .license
            .as_ref()
            .ok_or("license service not initialized")?;

        let token = command
            .payload
            .get("license_token")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .ok_or("missing license_token")?;

        license.apply(token).await.map_err(|e| e.to_string())?;
        Ok("license updated".to_owned())
    }

    async fn revoke_license(&self) -> Result<String, String> {
        let license = self
            .license
            .as_ref()
            .ok_or("license service not initialized")?;

        license.revoke().await.map_err(|e| e.to_string())?;
        Ok("license revoked".to_owned())
    }

    async fn resolve_alert(&self, command: &CommandMessage) -> Result<String, String> {
        let alert_id = command
            .payload
            .get("alert_id")
            .and_then(|v| v.as_f64())
            .map(|id| EdgeAlertId(id as i64))
            .ok_or("missing or invalid alert_id")?;

        self.store
            .resolve_alert(alert_id, Timestamp::now())
            .await
            .map_err(|e| e.to_string())?;

        info!(alert_id = %alert_id, "Alert resolved by control plane");
        Ok("alert resolved".to_owned())
    }
}

/// `POST /commands/{id}/ack` as the second tier.
pub struct HttpAckDelivery<S> {
    cloud: Arc<CloudClient<S>>,
}

#[async_trait]
impl<S: EdgeStore> Delivery<CommandAck> for HttpAckDelivery<S> {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, ack: &CommandAck) -> Result<(), DeliveryError> {
        Ok(self.cloud.ack_command(ack).await?)
    }
}

/// Reports command outcomes, bus first and HTTP second.
pub struct Acknowledger {
    route: Fallback<CommandAck>,
}

impl Acknowledger {
    pub fn new<S: EdgeStore>(
        bus: Arc<dyn MessageBus>,
        cabinet: CabinetId,
        cloud: Arc<CloudClient<S>>,
        publish_timeout: Duration,
    ) -> Self {
        let route = Fallback::new()
            .then(BusDelivery::new(bus, publish_timeout, move |ack: &CommandAck| {
                topic::command_response(&cabinet, &ack.command_id)
            }))
            .then(HttpAckDelivery { cloud });

        Self { route }
    }

    pub async fn acknowledge(&self, ack: &CommandAck) {
        match self.route.deliver(ack).await {
            Ok(via) => info!(command_id = %ack.command_id, status = ?ack.status, via, "Command acknowledged"),
            Err(e) => warn!(command_id = %ack.command_id, error = %e, "Failed to acknowledge command"),
        }
    }
}

pub async fn run_command_loop<S: EdgeStore>(
    executor: CommandExecutor<S>,
    acknowledger: Acknowledger,
    mut commands: mpsc::Receiver<BusMessage>,
    cancel: CancellationToken,
) {
    info!("Command handler started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Command handler shutting down");
                break;
            }
            message = commands.recv() => {
                let Some(message) = message else {
                    warn!("Command subscription closed");
                    break;
                };

                if let Some(ack) = executor.handle(&message.payload).await {
                    acknowledger.acknowledge(&ack).await;
                }
            }
        }
    }
}
