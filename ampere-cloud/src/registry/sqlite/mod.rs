mod alert;
mod cabinet;
mod command;
mod policy;
mod telemetry;

use std::str::FromStr;
use std::time::Duration;

use jiff::Timestamp;
use sqlx::{
    SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

pub use alert::SqliteAlertRegistry;
pub use cabinet::SqliteCabinetRegistry;
pub use command::SqliteCommandRegistry;
pub use policy::SqlitePolicyRegistry;
pub use telemetry::SqliteTelemetryRegistry;

use super::Registries;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, thiserror::Error)]
pub enum SqliteRegistryError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("invalid {field}: {value}")]
    InvalidEnum { field: &'static str, value: String },
}

/// Opens (creating if needed) the database at `path` and applies migrations.
pub async fn connect(path: impl AsRef<str>) -> Result<SqlitePool, SqliteRegistryError> {
    let connection_string = format!("sqlite:{}", path.as_ref());
    let options = SqliteConnectOptions::from_str(&connection_string)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    MIGRATOR.run(&pool).await?;

    Ok(pool)
}

pub async fn connect_in_memory() -> Result<SqlitePool, SqliteRegistryError> {
    // Every connection to `:memory:` is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    MIGRATOR.run(&pool).await?;

    Ok(pool)
}

fn timestamp(ms: i64) -> Result<Timestamp, SqliteRegistryError> {
    Timestamp::from_millisecond(ms).map_err(|_| SqliteRegistryError::InvalidTimestamp(ms))
}

fn optional_timestamp(ms: Option<i64>) -> Result<Option<Timestamp>, SqliteRegistryError> {
    ms.map(timestamp).transpose()
}

fn parse_ulid(value: &str) -> Result<ulid::Ulid, SqliteRegistryError> {
    ulid::Ulid::from_string(value)
        .map_err(|_| SqliteRegistryError::InvalidUlid(value.to_owned()))
}

fn invalid(field: &'static str, value: String) -> SqliteRegistryError {
    SqliteRegistryError::InvalidEnum { field, value }
}

/// SQLite backend. All registries share one pool.
#[derive(Clone)]
pub struct SqliteRegistries {
    pub cabinets: SqliteCabinetRegistry,
    pub commands: SqliteCommandRegistry,
    pub alerts: SqliteAlertRegistry,
    pub policies: SqlitePolicyRegistry,
    pub telemetry: SqliteTelemetryRegistry,
}

impl SqliteRegistries {
    pub async fn new(path: impl AsRef<str>) -> Result<Self, SqliteRegistryError> {
        Ok(Self::from_pool(connect(path).await?))
    }

    pub async fn new_in_memory() -> Result<Self, SqliteRegistryError> {
        Ok(Self::from_pool(connect_in_memory().await?))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            cabinets: SqliteCabinetRegistry::from_pool(pool.clone()),
            commands: SqliteCommandRegistry::from_pool(pool.clone()),
            alerts: SqliteAlertRegistry::from_pool(pool.clone()),
            policies: SqlitePolicyRegistry::from_pool(pool.clone()),
            telemetry: SqliteTelemetryRegistry::from_pool(pool),
        }
    }
}

impl Registries for SqliteRegistries {
    type Cabinets = SqliteCabinetRegistry;
    type Commands = SqliteCommandRegistry;
    type Alerts = SqliteAlertRegistry;
    type Policies = SqlitePolicyRegistry;
    type Telemetry = SqliteTelemetryRegistry;

    fn cabinets(&self) -> &Self::Cabinets {
        &self.cabinets
    }

    fn commands(&self) -> &Self::Commands {
        &self.commands
    }

    fn alerts(&self) -> &Self::Alerts {
        &self.alerts
    }

    fn policies(&self) -> &Self::Policies {
        &self.policies
    }

    fn telemetry(&self) -> &Self::Telemetry {
        &self.telemetry
    }
}
