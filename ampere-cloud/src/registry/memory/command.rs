use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use ampere_core::{CabinetId, CommandId, CommandStatus};
use async_trait::async_trait;
use jiff::Timestamp;
use tokio::sync::RwLock;

use crate::registry::{CommandRegistry, TIMEOUT_RESULT};
use crate::registry::models::Command;

#[derive(Clone, Default)]
pub struct InMemoryCommandRegistry {
    commands: Arc<RwLock<HashMap<CommandId, Command>>>,
}

fn apply(command: &mut Command, to: CommandStatus, result: Option<String>, at: Timestamp) {
    command.status = to;
    if result.is_some() {
        command.result = result;
    }
    match to {
        CommandStatus::Sent => command.sent_at = Some(at),
        s if s.is_terminal() => command.completed_at = Some(at),
        _ => {}
    }
}

#[async_trait]
impl CommandRegistry for InMemoryCommandRegistry {
    type Error = Infallible;

    async fn insert(&self, command: Command) -> Result<(), Self::Error> {
        let mut commands = self.commands.write().await;
        commands.insert(command.id, command);
        Ok(())
    }

    async fn get(&self, id: CommandId) -> Result<Option<Command>, Self::Error> {
        let commands = self.commands.read().await;
        Ok(commands.get(&id).cloned())
    }

    async fn list_for_cabinet(
        &self,
        cabinet: &CabinetId,
        limit: usize,
    ) -> Result<Vec<Command>, Self::Error> {
        let commands = self.commands.read().await;
        let mut matching: Vec<Command> = commands
            .values()
            .filter(|c| &c.cabinet_id == cabinet)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn transition(
        &self,
        id: CommandId,
        to: CommandStatus,
        result: Option<String>,
        at: Timestamp,
    ) -> Result<bool, Self::Error> {
        let mut commands = self.commands.write().await;
        let Some(command) = commands.get_mut(&id) else {
            return Ok(false);
        };

        if !command.status.can_transition(to) {
            return Ok(false);
        }
        apply(command, to, result, at);
        Ok(true)
    }

    async fn expire_sent(
        &self,
        sent_before: Timestamp,
        at: Timestamp,
    ) -> Result<Vec<CommandId>, Self::Error> {
        let mut commands = self.commands.write().await;
        let mut expired = Vec::new();

        for command in commands.values_mut() {
            let overdue = command.status == CommandStatus::Sent
                && command.sent_at.is_some_and(|sent| sent < sent_before);
            if overdue {
                apply(
                    command,
                    CommandStatus::Timeout,
                    Some(TIMEOUT_RESULT.to_owned()),
                    at,
                );
                expired.push(command.id);
            }
        }

        Ok(expired)
    }
}
