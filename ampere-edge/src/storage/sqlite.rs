use std::str::FromStr;

use ampere_core::{
    AccessLogId, AssessmentId, CabinetId, EdgeAlertId, EdgeSeverity, PolicyDocument, PolicyId,
    SampleId,
};
use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::{
    QueryBuilder, Row, Sqlite, SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};

use crate::storage::models::{
    AccessLog, AlertCondition, AlertRecord, AlertVersion, LicenseState, NewAccessLog,
    NewAssessment, NewSample, SensorSample, StoredCredentials, StoredPolicy,
    VulnerabilityAssessment,
};
use crate::storage::{EdgeStore, StoreStats};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const ALERT_COLUMNS: &str = "id, device_id, alert_type, severity, message, value, threshold, \
     timestamp, created_at, revision, resolved, resolved_at, synced_at";

const PENDING_ALERT: &str =
    "(synced_at IS NULL OR (resolved = 1 AND resolved_at IS NOT NULL AND resolved_at > synced_at))";

#[derive(Debug, thiserror::Error)]
pub enum SqliteStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("invalid severity: {0}")]
    InvalidSeverity(String),
    #[error("not found")]
    NotFound,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and applies migrations.
    pub async fn new(path: impl AsRef<str>) -> Result<Self, SqliteStoreError> {
        let connection_string = format!("sqlite:{}", path.as_ref());
        let options = SqliteConnectOptions::from_str(&connection_string)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn new_in_memory() -> Result<Self, SqliteStoreError> {
        // Every connection to `:memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }
}

fn timestamp(ms: i64) -> Result<Timestamp, SqliteStoreError> {
    Timestamp::from_millisecond(ms).map_err(|_| SqliteStoreError::InvalidTimestamp(ms))
}

fn optional_timestamp(ms: Option<i64>) -> Result<Option<Timestamp>, SqliteStoreError> {
    ms.map(timestamp).transpose()
}

fn sample_from_row(row: &SqliteRow) -> Result<SensorSample, SqliteStoreError> {
    Ok(SensorSample {
        id: SampleId(row.try_get("id")?),
        device_id: row.try_get("device_id")?,
        sensor_type: row.try_get("sensor_type")?,
        value: row.try_get("value")?,
        unit: row.try_get("unit")?,
        quality: row.try_get::<i64, _>("quality")?.clamp(0, 100) as u8,
        timestamp: timestamp(row.try_get("timestamp")?)?,
        synced: row.try_get("synced")?,
        synced_at: optional_timestamp(row.try_get("synced_at")?)?,
    })
}

fn alert_from_row(row: &SqliteRow) -> Result<AlertRecord, SqliteStoreError> {
    let severity: String = row.try_get("severity")?;
    Ok(AlertRecord {
        id: EdgeAlertId(row.try_get("id")?),
        device_id: row.try_get("device_id")?,
        alert_type: row.try_get("alert_type")?,
        severity: EdgeSeverity::parse(&severity)
            .ok_or(SqliteStoreError::InvalidSeverity(severity))?,
        message: row.try_get("message")?,
        value: row.try_get("value")?,
        threshold: row.try_get("threshold")?,
        timestamp: timestamp(row.try_get("timestamp")?)?,
        created_at: timestamp(row.try_get("created_at")?)?,
        resolved: row.try_get("resolved")?,
        resolved_at: optional_timestamp(row.try_get("resolved_at")?)?,
        synced_at: optional_timestamp(row.try_get("synced_at")?)?,
        revision: row.try_get("revision")?,
    })
}

fn assessment_from_row(row: &SqliteRow) -> Result<VulnerabilityAssessment, SqliteStoreError> {
    let detected: String = row.try_get("detected_vulnerabilities")?;
    Ok(VulnerabilityAssessment {
        id: AssessmentId(row.try_get("id")?),
        timestamp: timestamp(row.try_get("timestamp")?)?,
        license_compliance_score: row.try_get("license_compliance_score")?,
        communication_score: row.try_get("communication_score")?,
        config_security_score: row.try_get("config_security_score")?,
        data_anomaly_score: row.try_get("data_anomaly_score")?,
        overall_score: row.try_get("overall_score")?,
        risk_level: row.try_get("risk_level")?,
        detected_vulnerabilities: serde_json::from_str(&detected)?,
        synced: row.try_get("synced")?,
    })
}

fn access_log_from_row(row: &SqliteRow) -> Result<AccessLog, SqliteStoreError> {
    Ok(AccessLog {
        id: AccessLogId(row.try_get("id")?),
        subject_type: row.try_get("subject_type")?,
        subject_id: row.try_get("subject_id")?,
        action: row.try_get("action")?,
        resource: row.try_get("resource")?,
        allowed: row.try_get("allowed")?,
        timestamp: timestamp(row.try_get("timestamp")?)?,
        synced: row.try_get("synced")?,
    })
}

fn credentials_from_row(row: &SqliteRow) -> Result<StoredCredentials, SqliteStoreError> {
    let cabinet_id: String = row.try_get("cabinet_id")?;
    Ok(StoredCredentials {
        cabinet_id: CabinetId(cabinet_id.into()),
        api_key: row.try_get("api_key")?,
        endpoint: row.try_get("cloud_endpoint")?,
        enabled: row.try_get("enabled")?,
        created_at: timestamp(row.try_get("created_at")?)?,
        updated_at: timestamp(row.try_get("updated_at")?)?,
    })
}

#[async_trait]
impl EdgeStore for SqliteStore {
    type Error = SqliteStoreError;

    async fn insert_sample(&self, sample: NewSample) -> Result<SensorSample, Self::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO sensor_samples (device_id, sensor_type, value, unit, quality, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, device_id, sensor_type, value, unit, quality, timestamp, synced, synced_at
            "#,
        )
        .bind(&sample.device_id)
        .bind(&sample.sensor_type)
        .bind(sample.value)
        .bind(&sample.unit)
        .bind(i64::from(sample.quality.min(100)))
        .bind(sample.timestamp.as_millisecond())
        .fetch_one(&self.pool)
        .await?;

        sample_from_row(&row)
    }

    async fn unsynced_samples(&self, limit: usize) -> Result<Vec<SensorSample>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, device_id, sensor_type, value, unit, quality, timestamp, synced, synced_at
            FROM sensor_samples
            WHERE synced = 0
            ORDER BY timestamp ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sample_from_row).collect()
    }

    async fn mark_samples_synced(
        &self,
        ids: &[SampleId],
        at: Timestamp,
    ) -> Result<(), Self::Error> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE sensor_samples SET synced = 1, synced_at = ");
        qb.push_bind(at.as_millisecond());
        qb.push(" WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.0);
        }
        separated.push_unseparated(")");

        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_alert(&self, condition: AlertCondition) -> Result<AlertRecord, Self::Error> {
        let at = condition.timestamp.as_millisecond();
        let sql = format!(
            r#"
            INSERT INTO alerts (device_id, alert_type, severity, message, value, threshold, timestamp, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (device_id, alert_type) WHERE resolved = 0 DO UPDATE SET
                severity = excluded.severity,
                message = excluded.message,
                value = excluded.value,
                threshold = excluded.threshold,
                timestamp = excluded.timestamp,
                revision = alerts.revision + 1,
                synced_at = NULL
            RETURNING {ALERT_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(&condition.device_id)
            .bind(&condition.alert_type)
            .bind(condition.severity.as_str())
            .bind(&condition.message)
            .bind(condition.value)
            .bind(condition.threshold)
            .bind(at)
            .bind(at)
            .fetch_one(&self.pool)
            .await?;

        alert_from_row(&row)
    }

    async fn get_alert(&self, id: EdgeAlertId) -> Result<Option<AlertRecord>, Self::Error> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(alert_from_row).transpose()
    }

    async fn list_alerts(&self, include_resolved: bool) -> Result<Vec<AlertRecord>, Self::Error> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ALERT_COLUMNS} FROM alerts"));
        if !include_resolved {
            qb.push(" WHERE resolved = 0");
        }
        qb.push(" ORDER BY timestamp DESC, id DESC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn pending_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, Self::Error> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE {PENDING_ALERT} \
             ORDER BY timestamp ASC, id ASC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(alert_from_row).collect()
    }

    async fn mark_alerts_synced(
        &self,
        versions: &[AlertVersion],
        at: Timestamp,
    ) -> Result<(), Self::Error> {
        let mut tx = self.pool.begin().await?;

        for version in versions {
            sqlx::query("UPDATE alerts SET synced_at = ? WHERE id = ? AND revision = ?")
                .bind(at.as_millisecond())
                .bind(version.id.0)
                .bind(version.revision)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn resolve_alert(
        &self,
        id: EdgeAlertId,
        at: Timestamp,
    ) -> Result<AlertRecord, Self::Error> {
        let sql = format!(
            r#"
            UPDATE alerts
            SET resolved = 1, resolved_at = ?, synced_at = NULL, revision = revision + 1
            WHERE id = ?
            RETURNING {ALERT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(at.as_millisecond())
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => alert_from_row(&row),
            None => Err(SqliteStoreError::NotFound),
        }
    }

    async fn insert_assessment(
        &self,
        assessment: NewAssessment,
    ) -> Result<VulnerabilityAssessment, Self::Error> {
        let detected = serde_json::to_string(&assessment.detected_vulnerabilities)?;
        let row = sqlx::query(
            r#"
            INSERT INTO vulnerability_assessments (
                timestamp, license_compliance_score, communication_score, config_security_score,
                data_anomaly_score, overall_score, risk_level, detected_vulnerabilities
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(assessment.timestamp.as_millisecond())
        .bind(assessment.license_compliance_score)
        .bind(assessment.communication_score)
        .bind(assessment.config_security_score)
        .bind(assessment.data_anomaly_score)
        .bind(assessment.overall_score)
        .bind(&assessment.risk_level)
        .bind(detected)
        .fetch_one(&self.pool)
        .await?;

        assessment_from_row(&row)
    }

    async fn unsynced_assessments(
        &self,
        limit: usize,
    ) -> Result<Vec<VulnerabilityAssessment>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM vulnerability_assessments
            WHERE synced = 0
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(assessment_from_row).collect()
    }

    async fn mark_assessment_synced(
        &self,
        id: AssessmentId,
        at: Timestamp,
    ) -> Result<(), Self::Error> {
        sqlx::query("UPDATE vulnerability_assessments SET synced = 1, synced_at = ? WHERE id = ?")
            .bind(at.as_millisecond())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_access_log(&self, log: NewAccessLog) -> Result<AccessLog, Self::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO access_logs (subject_type, subject_id, action, resource, allowed, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&log.subject_type)
        .bind(&log.subject_id)
        .bind(&log.action)
        .bind(&log.resource)
        .bind(log.allowed)
        .bind(log.timestamp.as_millisecond())
        .fetch_one(&self.pool)
        .await?;

        access_log_from_row(&row)
    }

    async fn unsynced_access_logs(&self, limit: usize) -> Result<Vec<AccessLog>, Self::Error> {
        let rows = sqlx::query(
            "SELECT * FROM access_logs WHERE synced = 0 ORDER BY timestamp ASC, id ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(access_log_from_row).collect()
    }

    async fn mark_access_logs_synced(&self, ids: &[AccessLogId]) -> Result<(), Self::Error> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE access_logs SET synced = 1 WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.0);
        }
        separated.push_unseparated(")");

        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn save_policy(&self, policy: PolicyDocument, at: Timestamp) -> Result<(), Self::Error> {
        let document = serde_json::to_string(&policy.document)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO policies (id, name, subject_type, document, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(policy.id.as_str())
        .bind(&policy.name)
        .bind(&policy.subject_type)
        .bind(document)
        .bind(at.as_millisecond())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_policy(&self, id: &PolicyId) -> Result<bool, Self::Error> {
        let result = sqlx::query("DELETE FROM policies WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_policies(&self) -> Result<(), Self::Error> {
        sqlx::query("DELETE FROM policies")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_policies(&self) -> Result<Vec<StoredPolicy>, Self::Error> {
        let rows = sqlx::query(
            "SELECT id, name, subject_type, document, updated_at FROM policies ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut policies = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let document: String = row.try_get("document")?;
            policies.push(StoredPolicy {
                policy: PolicyDocument {
                    id: PolicyId(id.into()),
                    name: row.try_get("name")?,
                    subject_type: row.try_get("subject_type")?,
                    document: serde_json::from_str(&document)?,
                },
                updated_at: timestamp(row.try_get("updated_at")?)?,
            });
        }
        Ok(policies)
    }

    async fn upsert_credentials(
        &self,
        credentials: StoredCredentials,
    ) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO cloud_credentials (cabinet_id, api_key, cloud_endpoint, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (cabinet_id) DO UPDATE SET
                api_key = excluded.api_key,
                cloud_endpoint = excluded.cloud_endpoint,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(credentials.cabinet_id.as_str())
        .bind(&credentials.api_key)
        .bind(&credentials.endpoint)
        .bind(credentials.enabled)
        .bind(credentials.created_at.as_millisecond())
        .bind(credentials.updated_at.as_millisecond())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn first_enabled_credentials(&self) -> Result<Option<StoredCredentials>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT cabinet_id, api_key, cloud_endpoint, enabled, created_at, updated_at
            FROM cloud_credentials
            WHERE enabled = 1
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(credentials_from_row).transpose()
    }

    async fn credentials_for(
        &self,
        cabinet_id: &CabinetId,
    ) -> Result<Option<StoredCredentials>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT cabinet_id, api_key, cloud_endpoint, enabled, created_at, updated_at
            FROM cloud_credentials
            WHERE cabinet_id = ?
            "#,
        )
        .bind(cabinet_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(credentials_from_row).transpose()
    }

    async fn current_license(&self) -> Result<Option<LicenseState>, Self::Error> {
        let row = sqlx::query("SELECT token, applied_at, revoked_at FROM licenses WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(LicenseState {
            token: row.try_get("token")?,
            applied_at: timestamp(row.try_get("applied_at")?)?,
            revoked_at: optional_timestamp(row.try_get("revoked_at")?)?,
        }))
    }

    async fn store_license(&self, token: &str, at: Timestamp) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO licenses (id, token, applied_at, revoked_at)
            VALUES (1, ?, ?, NULL)
            ON CONFLICT (id) DO UPDATE SET
                token = excluded.token,
                applied_at = excluded.applied_at,
                revoked_at = NULL
            "#,
        )
        .bind(token)
        .bind(at.as_millisecond())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_license(&self, at: Timestamp) -> Result<bool, Self::Error> {
        let result =
            sqlx::query("UPDATE licenses SET revoked_at = ? WHERE id = 1 AND revoked_at IS NULL")
                .bind(at.as_millisecond())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<StoreStats, Self::Error> {
        let sql = format!(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sensor_samples WHERE synced = 0) AS samples_pending,
                (SELECT COUNT(*) FROM sensor_samples) AS samples_total,
                (SELECT COUNT(*) FROM alerts WHERE {PENDING_ALERT}) AS alerts_pending,
                (SELECT COUNT(*) FROM alerts WHERE resolved = 0) AS alerts_open,
                (SELECT COUNT(*) FROM vulnerability_assessments WHERE synced = 0) AS assessments_pending,
                (SELECT COUNT(*) FROM access_logs WHERE synced = 0) AS access_logs_pending,
                (SELECT COUNT(*) FROM policies) AS policies
            "#
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;

        let count = |column: &str| -> Result<usize, SqliteStoreError> {
            Ok(row.try_get::<i64, _>(column)?.max(0) as usize)
        };

        Ok(StoreStats {
            samples_pending: count("samples_pending")?,
            samples_total: count("samples_total")?,
            alerts_pending: count("alerts_pending")?,
            alerts_open: count("alerts_open")?,
            assessments_pending: count("assessments_pending")?,
            access_logs_pending: count("access_logs_pending")?,
            policies: count("policies")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(value: f64, at: Timestamp) -> AlertCondition {
        AlertCondition {
            device_id: "dev-7".into(),
            alert_type: "temperature_high".into(),
            severity: EdgeSeverity::High,
            message: format!("temperature {value} above threshold"),
            value,
            threshold: 55.0,
            timestamp: at,
        }
    }

    #[tokio::test]
    async fn upsert_keeps_one_open_alert_per_device_and_type() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let t0 = Timestamp::from_second(1_700_000_000).unwrap();

        let first = store.upsert_alert(condition(60.0, t0)).await.unwrap();
        let second = store
            .upsert_alert(condition(62.0, t0 + jiff::SignedDuration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.revision, 2);
        assert_eq!(second.value, 62.0);
        assert_eq!(second.created_at, t0);
        assert_eq!(store.list_alerts(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolved_alert_frees_the_slot_for_a_new_one() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let t0 = Timestamp::from_second(1_700_000_000).unwrap();

        let first = store.upsert_alert(condition(60.0, t0)).await.unwrap();
        store.resolve_alert(first.id, t0).await.unwrap();
        let next = store.upsert_alert(condition(61.0, t0)).await.unwrap();

        assert_ne!(first.id, next.id);
        assert_eq!(store.list_alerts(false).await.unwrap(), vec![next]);
    }

    #[tokio::test]
    async fn stale_revision_does_not_mark_synced() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let t0 = Timestamp::from_second(1_700_000_000).unwrap();

        let read = store.upsert_alert(condition(60.0, t0)).await.unwrap();
        store.upsert_alert(condition(63.0, t0)).await.unwrap();
        store
            .mark_alerts_synced(&[read.version()], Timestamp::now())
            .await
            .unwrap();

        let pending = store.pending_alerts(100).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].value, 63.0);
    }

    #[tokio::test]
    async fn resolving_unknown_alert_is_not_found() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let err = store
            .resolve_alert(EdgeAlertId(999), Timestamp::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SqliteStoreError::NotFound));
    }
}
