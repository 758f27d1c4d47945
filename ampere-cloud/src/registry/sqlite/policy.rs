use ampere_core::{
    CabinetId, DistributionId, DistributionOperation, DistributionStatus, PolicyDocument, PolicyId,
};
use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use super::{
    SqliteRegistryError, connect, connect_in_memory, invalid, optional_timestamp, parse_ulid,
    timestamp,
};
use crate::registry::PolicyRegistry;
use crate::registry::models::DistributionLogEntry;

const DISTRIBUTION_COLUMNS: &str = "id, policy_id, cabinet_id, operation, status, operator, \
     error_message, distributed_at, acknowledged_at";

#[derive(Clone)]
pub struct SqlitePolicyRegistry {
    pool: SqlitePool,
}

impl SqlitePolicyRegistry {
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

fn policy_from_row(row: &SqliteRow) -> Result<PolicyDocument, SqliteRegistryError> {
    let id: String = row.try_get("id")?;
    let document: String = row.try_get("document")?;
    Ok(PolicyDocument {
        id: PolicyId(id.into_boxed_str()),
        name: row.try_get("name")?,
        subject_type: row.try_get("subject_type")?,
        document: serde_json::from_str(&document)?,
    })
}

fn distribution_from_row(row: &SqliteRow) -> Result<DistributionLogEntry, SqliteRegistryError> {
    let id: String = row.try_get("id")?;
    let policy_id: String = row.try_get("policy_id")?;
    let cabinet_id: String = row.try_get("cabinet_id")?;
    let operation: String = row.try_get("operation")?;
    let status: String = row.try_get("status")?;

    Ok(DistributionLogEntry {
        id: DistributionId(parse_ulid(&id)?),
        policy_id: PolicyId(policy_id.into_boxed_str()),
        cabinet_id: CabinetId(cabinet_id.into_boxed_str()),
        operation: DistributionOperation::parse(&operation)
            .ok_or_else(|| invalid("distribution operation", operation))?,
        status: DistributionStatus::parse(&status)
            .ok_or_else(|| invalid("distribution status", status))?,
        operator: row.try_get("operator")?,
        error_message: row.try_get("error_message")?,
        distributed_at: timestamp(row.try_get("distributed_at")?)?,
        acknowledged_at: optional_timestamp(row.try_get("acknowledged_at")?)?,
    })
}

#[async_trait]
impl PolicyRegistry for SqlitePolicyRegistry {
    type Error = SqliteRegistryError;

    async fn save_policy(&self, policy: PolicyDocument, at: Timestamp) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO policies (id, name, subject_type, document, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(policy.id.as_str())
        .bind(&policy.name)
        .bind(&policy.subject_type)
        .bind(serde_json::to_string(&policy.document)?)
        .bind(at.as_millisecond())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_policy(&self, id: &PolicyId) -> Result<Option<PolicyDocument>, Self::Error> {
        let row = sqlx::query("SELECT id, name, subject_type, document FROM policies WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(policy_from_row).transpose()
    }

    async fn device_policies(&self) -> Result<Vec<PolicyDocument>, Self::Error> {
        let rows = sqlx::query(
            "SELECT id, name, subject_type, document FROM policies \
             WHERE subject_type = 'device' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(policy_from_row).collect()
    }

    async fn record_distribution(&self, entry: DistributionLogEntry) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO policy_distribution_logs
                (id, policy_id, cabinet_id, operation, status, operator, error_message,
                 distributed_at, acknowledged_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.0.to_string())
        .bind(entry.policy_id.as_str())
        .bind(entry.cabinet_id.as_str())
        .bind(entry.operation.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.operator)
        .bind(&entry.error_message)
        .bind(entry.distributed_at.as_millisecond())
        .bind(entry.acknowledged_at.map(|t| t.as_millisecond()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_distribution(
        &self,
        id: DistributionId,
        error: &str,
    ) -> Result<(), Self::Error> {
        sqlx::query(
            "UPDATE policy_distribution_logs SET status = 'failed', error_message = ? WHERE id = ?",
        )
        .bind(error)
        .bind(id.0.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn acknowledge(
        &self,
        policy: &PolicyId,
        cabinet: &CabinetId,
        at: Timestamp,
    ) -> Result<usize, Self::Error> {
        let result = sqlx::query(
            r#"
            UPDATE policy_distribution_logs
            SET status = 'success', acknowledged_at = ?
            WHERE policy_id = ? AND cabinet_id = ? AND status = 'pending'
            "#,
        )
        .bind(at.as_millisecond())
        .bind(policy.as_str())
        .bind(cabinet.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn distributions_for(
        &self,
        policy: &PolicyId,
    ) -> Result<Vec<DistributionLogEntry>, Self::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {DISTRIBUTION_COLUMNS} FROM policy_distribution_logs \
             WHERE policy_id = ? ORDER BY distributed_at, id"
        ))
        .bind(policy.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(distribution_from_row).collect()
    }
}
