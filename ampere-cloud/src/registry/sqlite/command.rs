use ampere_core::{CabinetId, CommandId, CommandStatus, CommandType};
use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqliteRow};

use super::{
    SqliteRegistryError, connect, connect_in_memory, invalid, optional_timestamp, parse_ulid,
    timestamp,
};
use crate::registry::models::Command;
use crate::registry::{CommandRegistry, TIMEOUT_RESULT};

const COLUMNS: &str = "id, cabinet_id, command_type, payload, status, result, created_by, \
     created_at, sent_at, completed_at";

#[derive(Clone)]
pub struct SqliteCommandRegistry {
    pool: SqlitePool,
}

impl SqliteCommandRegistry {
    pub async fn new(path: impl AsRef<str>) -> Result<Self, SqliteRegistryError> {
        Ok(Self::from_pool(connect(path).await?))
    }

    pub async fn new_in_memory() -> Result<Self, SqliteRegistryError> {
        Ok(Self::from_pool(connect_in_memory().await?))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn command_from_row(row: &SqliteRow) -> Result<Command, SqliteRegistryError> {
    let id: String = row.try_get("id")?;
    let cabinet_id: String = row.try_get("cabinet_id")?;
    let command_type: String = row.try_get("command_type")?;
    let status: String = row.try_get("status")?;
    let payload: String = row.try_get("payload")?;

    Ok(Command {
        id: CommandId(parse_ulid(&id)?),
        cabinet_id: CabinetId(cabinet_id.into_boxed_str()),
        command_type: CommandType::parse(&command_type)
            .ok_or_else(|| invalid("command type", command_type))?,
        payload: serde_json::from_str(&payload)?,
        status: CommandStatus::parse(&status).ok_or_else(|| invalid("command status", status))?,
        result: row.try_get("result")?,
        created_by: row.try_get("created_by")?,
        created_at: timestamp(row.try_get("created_at")?)?,
        sent_at: optional_timestamp(row.try_get("sent_at")?)?,
        completed_at: optional_timestamp(row.try_get("completed_at")?)?,
    })
}

#[async_trait]
impl CommandRegistry for SqliteCommandRegistry {
    type Error = SqliteRegistryError;

    async fn insert(&self, command: Command) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO commands
                (id, cabinet_id, command_type, payload, status, result, created_by,
                 created_at, sent_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(command.id.0.to_string())
        .bind(command.cabinet_id.as_str())
        .bind(command.command_type.as_str())
        .bind(serde_json::to_string(&command.payload)?)
        .bind(command.status.as_str())
        .bind(&command.result)
        .bind(&command.created_by)
        .bind(command.created_at.as_millisecond())
        .bind(command.sent_at.map(|t| t.as_millisecond()))
        .bind(command.completed_at.map(|t| t.as_millisecond()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: CommandId) -> Result<Option<Command>, Self::Error> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM commands WHERE id = ?"))
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(command_from_row).transpose()
    }

    async fn list_for_cabinet(
        &self,
        cabinet: &CabinetId,
        limit: usize,
    ) -> Result<Vec<Command>, Self::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM commands WHERE cabinet_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ?"
        ))
        .bind(cabinet.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(command_from_row).collect()
    }

    async fn transition(
        &self,
        id: CommandId,
        to: CommandStatus,
        result: Option<String>,
        at: Timestamp,
    ) -> Result<bool, Self::Error> {
        let predecessors = to.predecessors();
        if predecessors.is_empty() {
            return Ok(false);
        }

        let mut query_builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE commands SET status = ");
        query_builder.push_bind(to.as_str());
        query_builder.push(", result = COALESCE(");
        query_builder.push_bind(result);
        query_builder.push(", result)");

        match to {
            CommandStatus::Sent => {
                query_builder.push(", sent_at = ");
                query_builder.push_bind(at.as_millisecond());
            }
            s if s.is_terminal() => {
                query_builder.push(", completed_at = ");
                query_builder.push_bind(at.as_millisecond());
            }
            _ => {}
        }

        query_builder.push(" WHERE id = ");
        query_builder.push_bind(id.0.to_string());
        query_builder.push(" AND status IN (");
        let mut separated = query_builder.separated(", ");
        for status in predecessors {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");

        let outcome = query_builder.build().execute(&self.pool).await?;
        Ok(outcome.rows_affected() == 1)
    }

    async fn expire_sent(
        &self,
        sent_before: Timestamp,
        at: Timestamp,
    ) -> Result<Vec<CommandId>, Self::Error> {
        let rows = sqlx::query(
            r#"
            UPDATE commands
            SET status = 'timeout', result = ?, completed_at = ?
            WHERE status = 'sent' AND sent_at < ?
            RETURNING id
            "#,
        )
        .bind(TIMEOUT_RESULT)
        .bind(at.as_millisecond())
        .bind(sent_before.as_millisecond())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                Ok(CommandId(parse_ulid(&id)?))
            })
            .collect()
    }
}
