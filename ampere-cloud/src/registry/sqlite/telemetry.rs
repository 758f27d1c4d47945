use ampere_core::{AccessLogReport, AssessmentId, CabinetId, SensorReport, VulnerabilityReport};
use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::{Row, SqlitePool};

use super::{SqliteRegistryError, connect, connect_in_memory, timestamp};
use crate::registry::TelemetryRegistry;
use crate::registry::models::TelemetryCounts;

#[derive(Clone)]
pub struct SqliteTelemetryRegistry {
    pool: SqlitePool,
}

impl SqliteTelemetryRegistry {
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

#[async_trait]
impl TelemetryRegistry for SqliteTelemetryRegistry {
    type Error = SqliteRegistryError;

    async fn store_samples(
        &self,
        cabinet: &CabinetId,
        samples: &[SensorReport],
        at: Timestamp,
    ) -> Result<usize, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for sample in samples {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO sensor_samples
                    (cabinet_id, edge_sample_id, device_id, sensor_type, value, unit, quality,
                     timestamp, received_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(cabinet.as_str())
            .bind(sample.id.0)
            .bind(&sample.device_id)
            .bind(&sample.sensor_type)
            .bind(sample.value)
            .bind(&sample.unit)
            .bind(sample.quality as i64)
            .bind(sample.timestamp.as_millisecond())
            .bind(at.as_millisecond())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn store_access_logs(
        &self,
        cabinet: &CabinetId,
        logs: &[AccessLogReport],
    ) -> Result<usize, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for log in logs {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO access_logs
                    (cabinet_id, edge_log_id, subject_type, subject_id, action, resource,
                     allowed, timestamp)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(cabinet.as_str())
            .bind(log.id.0)
            .bind(&log.subject_type)
            .bind(&log.subject_id)
            .bind(&log.action)
            .bind(&log.resource)
            .bind(log.allowed)
            .bind(log.timestamp.as_millisecond())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn store_assessment(&self, report: &VulnerabilityReport) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO vulnerability_assessments
                (cabinet_id, assessment_id, timestamp, license_compliance_score,
                 communication_score, config_security_score, data_anomaly_score,
                 overall_score, risk_level, detected_vulnerabilities)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(report.cabinet_id.as_str())
        .bind(report.assessment_id.0)
        .bind(report.timestamp.as_millisecond())
        .bind(report.license_compliance_score)
        .bind(report.communication_score)
        .bind(report.config_security_score)
        .bind(report.data_anomaly_score)
        .bind(report.overall_score)
        .bind(&report.risk_level)
        .bind(serde_json::to_string(&report.detected_vulnerabilities)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_assessment(
        &self,
        cabinet: &CabinetId,
    ) -> Result<Option<VulnerabilityReport>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT cabinet_id, assessment_id, timestamp, license_compliance_score,
                   communication_score, config_security_score, data_anomaly_score,
                   overall_score, risk_level, detected_vulnerabilities
            FROM vulnerability_assessments
            WHERE cabinet_id = ?
            ORDER BY timestamp DESC, assessment_id DESC
            LIMIT 1
            "#,
        )
        .bind(cabinet.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let detected: String = row.try_get("detected_vulnerabilities")?;
        Ok(Some(VulnerabilityReport {
            cabinet_id: cabinet.clone(),
            assessment_id: AssessmentId(row.try_get("assessment_id")?),
            timestamp: timestamp(row.try_get("timestamp")?)?,
            license_compliance_score: row.try_get("license_compliance_score")?,
            communication_score: row.try_get("communication_score")?,
            config_security_score: row.try_get("config_security_score")?,
            data_anomaly_score: row.try_get("data_anomaly_score")?,
            overall_score: row.try_get("overall_score")?,
            risk_level: row.try_get("risk_level")?,
            detected_vulnerabilities: serde_json::from_str(&detected)?,
        }))
    }

    async fn counts(&self, cabinet: &CabinetId) -> Result<TelemetryCounts, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sensor_samples WHERE cabinet_id = ?1) AS samples,
                (SELECT COUNT(*) FROM access_logs WHERE cabinet_id = ?1) AS access_logs,
                (SELECT COUNT(*) FROM vulnerability_assessments WHERE cabinet_id = ?1)
                    AS assessments
            "#,
        )
        .bind(cabinet.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(TelemetryCounts {
            samples: row.try_get::<i64, _>("samples")? as usize,
            access_logs: row.try_get::<i64, _>("access_logs")? as usize,
            assessments: row.try_get::<i64, _>("assessments")? as usize,
        })
    }
}
