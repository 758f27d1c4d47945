use ampere_core::{AckStatus, CabinetId, CommandAck, CommandId, CommandStatus};
use jiff::Timestamp;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::registry::{CommandRegistry, Registries, RegistryError, boxed};

#[derive(Debug, Error)]
pub enum AckError {
    #[error("invalid command id: {0}")]
    InvalidCommandId(String),
    #[error("command {0} not found")]
    UnknownCommand(String),
    #[error("command {command} does not belong to cabinet {cabinet}")]
    NotOwner { command: CommandId, cabinet: CabinetId },
    #[error("registry error: {0}")]
    Registry(RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Applied(CommandStatus),
    /// The command was already terminal; nothing changed.
    Ignored(CommandStatus),
}

/// Applies edge acknowledgments to the command registry, whichever transport
/// they arrived on.
#[derive(Clone)]
pub struct AckHandler<R> {
    registries: R,
}

impl<R: Registries> AckHandler<R> {
    pub fn new(registries: R) -> Self {
        Self { registries }
    }

    /// `cabinet` is the sender as established by the transport (bearer key or
    /// topic). It must own the command.
    pub async fn apply(
        &self,
        cabinet: &CabinetId,
        ack: &CommandAck,
    ) -> Result<AckOutcome, AckError> {
        let id = ulid::Ulid::from_string(&ack.command_id)
            .map(CommandId)
            .map_err(|_| AckError::InvalidCommandId(ack.command_id.clone()))?;

        let commands = self.registries.commands();
        let command = commands
            .get(id)
            .await
            .map_err(|e| AckError::Registry(boxed(e)))?
            .ok_or_else(|| AckError::UnknownCommand(ack.command_id.clone()))?;

        if &command.cabinet_id != cabinet {
            warn!(command_id = %id, owner = %command.cabinet_id, sender = %cabinet, "Rejected acknowledgment from foreign cabinet");
            return Err(AckError::NotOwner {
                command: id,
                cabinet: cabinet.clone(),
            });
        }

        let to = match ack.status {
            AckStatus::Success => CommandStatus::Success,
            AckStatus::Failed => CommandStatus::Failed,
        };

        let moved = commands
            .transition(id, to, Some(ack.message.clone()), Timestamp::now())
            .await
            .map_err(|e| AckError::Registry(boxed(e)))?;

        if moved {
            info!(command_id = %id, cabinet_id = %cabinet, status = to.as_str(), "Command acknowledged");
            return Ok(AckOutcome::Applied(to));
        }

        // Re-read so the caller sees what the command settled on
        let current = commands
            .get(id)
            .await
            .map_err(|e| AckError::Registry(boxed(e)))?
            .map(|c| c.status)
            .unwrap_or(command.status);
        debug!(command_id = %id, status = current.as_str(), "Acknowledgment for settled command ignored");
        Ok(AckOutcome::Ignored(current))
    }
}
