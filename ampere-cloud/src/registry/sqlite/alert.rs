use ampere_core::{AlertId, AlertReport, CabinetId, CloudSeverity, EdgeAlertId};
use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqliteRow};

use super::{
    SqliteRegistryError, connect, connect_in_memory, invalid, optional_timestamp, parse_ulid,
    timestamp,
};
use crate::registry::AlertRegistry;
use crate::registry::models::{AlertFilter, CloudAlert, alert_details, resolver};

const COLUMNS: &str = "id, cabinet_id, alert_type, device_id, severity, message, details, \
     edge_alert_id, resolved, resolved_at, resolved_by, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteAlertRegistry {
    pool: SqlitePool,
}

impl SqliteAlertRegistry {
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

fn alert_from_row(row: &SqliteRow) -> Result<CloudAlert, SqliteRegistryError> {
    let id: String = row.try_get("id")?;
    let cabinet_id: String = row.try_get("cabinet_id")?;
    let severity: String = row.try_get("severity")?;
    let details: String = row.try_get("details")?;

    Ok(CloudAlert {
        id: AlertId(parse_ulid(&id)?),
        cabinet_id: CabinetId(cabinet_id.into_boxed_str()),
        alert_type: row.try_get("alert_type")?,
        device_id: row.try_get("device_id")?,
        severity: CloudSeverity::parse(&severity).ok_or_else(|| invalid("severity", severity))?,
        message: row.try_get("message")?,
        details: serde_json::from_str(&details)?,
        edge_alert_id: row.try_get::<Option<i64>, _>("edge_alert_id")?.map(EdgeAlertId),
        resolved: row.try_get("resolved")?,
        resolved_at: optional_timestamp(row.try_get("resolved_at")?)?,
        resolved_by: row.try_get("resolved_by")?,
        created_at: timestamp(row.try_get("created_at")?)?,
        updated_at: timestamp(row.try_get("updated_at")?)?,
    })
}

#[async_trait]
impl AlertRegistry for SqliteAlertRegistry {
    type Error = SqliteRegistryError;

    async fn upsert(
        &self,
        cabinet: &CabinetId,
        report: &AlertReport,
        at: Timestamp,
    ) -> Result<CloudAlert, Self::Error> {
        // Insert or update is decided by the UNIQUE index inside one statement.
        let sql = format!(
            r#"
            INSERT INTO alerts
                (id, cabinet_id, alert_type, device_id, severity, message, details,
                 edge_alert_id, resolved, resolved_at, resolved_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (cabinet_id, alert_type, device_id) DO UPDATE SET
                severity = excluded.severity,
                message = excluded.message,
                details = excluded.details,
                edge_alert_id = COALESCE(excluded.edge_alert_id, alerts.edge_alert_id),
                resolved = excluded.resolved,
                resolved_at = excluded.resolved_at,
                resolved_by = CASE
                    WHEN excluded.resolved = 0 THEN NULL
                    WHEN alerts.resolved = 1 AND alerts.resolved_by IS NOT NULL
                        THEN alerts.resolved_by
                    ELSE excluded.resolved_by
                END,
                updated_at = excluded.updated_at
            RETURNING {COLUMNS}
            "#
        );

        let resolved_at = report
            .resolved
            .then(|| report.resolved_at.unwrap_or(at).as_millisecond());
        let details = serde_json::to_string(&alert_details(report))?;

        let row = sqlx::query(&sql)
            .bind(ulid::Ulid::new().to_string())
            .bind(cabinet.as_str())
            .bind(&report.alert_type)
            .bind(&report.device_id)
            .bind(report.severity.as_str())
            .bind(&report.message)
            .bind(&details)
            .bind(report.alert_id.map(|id| id.0))
            .bind(report.resolved)
            .bind(resolved_at)
            .bind(resolver(report, None))
            .bind(at.as_millisecond())
            .bind(at.as_millisecond())
            .fetch_one(&self.pool)
            .await?;

        alert_from_row(&row)
    }

    async fn get(&self, id: AlertId) -> Result<Option<CloudAlert>, Self::Error> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM alerts WHERE id = ?"))
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(alert_from_row).transpose()
    }

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<CloudAlert>, Self::Error> {
        let mut query_builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM alerts WHERE 1 = 1"));

        if let Some(cabinet) = &filter.cabinet_id {
            query_builder.push(" AND cabinet_id = ");
            query_builder.push_bind(cabinet.as_str());
        }
        if !filter.include_resolved {
            query_builder.push(" AND resolved = 0");
        }
        query_builder.push(" ORDER BY updated_at DESC, id DESC");

        let rows = query_builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn resolve(&self, id: AlertId, by: &str, at: Timestamp) -> Result<bool, Self::Error> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET resolved = 1, resolved_at = ?, resolved_by = ?, updated_at = ?
            WHERE id = ? AND resolved = 0
            "#,
        )
        .bind(at.as_millisecond())
        .bind(by)
        .bind(at.as_millisecond())
        .bind(id.0.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
