use ampere_core::{CabinetId, CabinetMetadata};
use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use super::{SqliteRegistryError, connect, connect_in_memory, optional_timestamp, timestamp};
use crate::registry::CabinetRegistry;
use crate::registry::models::Cabinet;

const COLUMNS: &str =
    "id, name, api_key, location, ip_address, firmware_version, created_at, last_sync_at";

#[derive(Clone)]
pub struct SqliteCabinetRegistry {
    pool: SqlitePool,
}

impl SqliteCabinetRegistry {
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

fn cabinet_from_row(row: &SqliteRow) -> Result<Cabinet, SqliteRegistryError> {
    let id: String = row.try_get("id")?;
    Ok(Cabinet {
        id: CabinetId(id.into_boxed_str()),
        name: row.try_get("name")?,
        api_key: row.try_get("api_key")?,
        location: row.try_get("location")?,
        ip_address: row.try_get("ip_address")?,
        firmware_version: row.try_get("firmware_version")?,
        created_at: timestamp(row.try_get("created_at")?)?,
        last_sync_at: optional_timestamp(row.try_get("last_sync_at")?)?,
    })
}

#[async_trait]
impl CabinetRegistry for SqliteCabinetRegistry {
    type Error = SqliteRegistryError;

    async fn register(&self, cabinet: Cabinet) -> Result<bool, Self::Error> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO cabinets
                (id, name, api_key, location, ip_address, firmware_version, created_at, last_sync_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(cabinet.id.as_str())
        .bind(&cabinet.name)
        .bind(&cabinet.api_key)
        .bind(&cabinet.location)
        .bind(&cabinet.ip_address)
        .bind(&cabinet.firmware_version)
        .bind(cabinet.created_at.as_millisecond())
        .bind(cabinet.last_sync_at.map(|t| t.as_millisecond()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: &CabinetId) -> Result<Option<Cabinet>, Self::Error> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM cabinets WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(cabinet_from_row).transpose()
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Cabinet>, Self::Error> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM cabinets WHERE api_key = ?"))
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(cabinet_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Cabinet>, Self::Error> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM cabinets ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(cabinet_from_row).collect()
    }

    async fn update_metadata(
        &self,
        id: &CabinetId,
        metadata: &CabinetMetadata,
    ) -> Result<bool, Self::Error> {
        let result = sqlx::query(
            r#"
            UPDATE cabinets SET
                name = COALESCE(?, name),
                location = COALESCE(?, location),
                ip_address = COALESCE(?, ip_address),
                firmware_version = COALESCE(?, firmware_version)
            WHERE id = ?
            "#,
        )
        .bind(&metadata.name)
        .bind(&metadata.location)
        .bind(&metadata.ip_address)
        .bind(&metadata.firmware_version)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn touch_sync(&self, id: &CabinetId, at: Timestamp) -> Result<(), Self::Error> {
        sqlx::query("UPDATE cabinets SET last_sync_at = ? WHERE id = ?")
            .bind(at.as_millisecond())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
