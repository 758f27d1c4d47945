pub mod memory;
pub mod models;
pub mod sqlite;

use ampere_core::{
    AccessLogReport, AlertId, AlertReport, CabinetId, CabinetMetadata, CommandId, CommandStatus,
    DistributionId, PolicyDocument, PolicyId, SensorReport, VulnerabilityReport,
};
use async_trait::async_trait;
use jiff::Timestamp;

use models::{AlertFilter, Cabinet, CloudAlert, Command, DistributionLogEntry, TelemetryCounts};

/// Result text of a command moved to `timeout` by the sweep.
pub const TIMEOUT_RESULT: &str = "no acknowledgment received";

/// Registered cabinets and the API keys that authenticate them.
#[async_trait]
pub trait CabinetRegistry: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns false when a cabinet with the same id already exists.
    async fn register(&self, cabinet: Cabinet) -> Result<bool, Self::Error>;

    async fn get(&self, id: &CabinetId) -> Result<Option<Cabinet>, Self::Error>;

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Cabinet>, Self::Error>;

    async fn list(&self) -> Result<Vec<Cabinet>, Self::Error>;

    /// Overwrites the edge-reported fields. Absent fields keep their value.
    async fn update_metadata(
        &self,
        id: &CabinetId,
        metadata: &CabinetMetadata,
    ) -> Result<bool, Self::Error>;

    async fn touch_sync(&self, id: &CabinetId, at: Timestamp) -> Result<(), Self::Error>;
}

/// Commands and their lifecycle.
///
/// Status changes go through [`CommandRegistry::transition`], which only
/// succeeds from one of the target's predecessors. A command that already
/// reached a terminal state is never moved again.
#[async_trait]
pub trait CommandRegistry: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn insert(&self, command: Command) -> Result<(), Self::Error>;

    async fn get(&self, id: CommandId) -> Result<Option<Command>, Self::Error>;

    /// Newest first.
    async fn list_for_cabinet(
        &self,
        cabinet: &CabinetId,
        limit: usize,
    ) -> Result<Vec<Command>, Self::Error>;

    /// Moves the command to `to` if its current status allows it. Returns
    /// whether a row changed.
    async fn transition(
        &self,
        id: CommandId,
        to: CommandStatus,
        result: Option<String>,
        at: Timestamp,
    ) -> Result<bool, Self::Error>;

    /// Moves every command sent before `sent_before` to `timeout`.
    async fn expire_sent(
        &self,
        sent_before: Timestamp,
        at: Timestamp,
    ) -> Result<Vec<CommandId>, Self::Error>;
}

#[async_trait]
pub trait AlertRegistry: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Updates the record for `(cabinet, alert_type, device_id)` in place, or
    /// inserts one. The id and creation time of an existing record survive.
    async fn upsert(
        &self,
        cabinet: &CabinetId,
        report: &AlertReport,
        at: Timestamp,
    ) -> Result<CloudAlert, Self::Error>;

    async fn get(&self, id: AlertId) -> Result<Option<CloudAlert>, Self::Error>;

    /// Newest update first.
    async fn list(&self, filter: &AlertFilter) -> Result<Vec<CloudAlert>, Self::Error>;

    /// Resolves an open alert. Returns false if it was already resolved or
    /// does not exist.
    async fn resolve(&self, id: AlertId, by: &str, at: Timestamp) -> Result<bool, Self::Error>;
}

/// Policy documents and the distribution ledger.
#[async_trait]
pub trait PolicyRegistry: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn save_policy(&self, policy: PolicyDocument, at: Timestamp)
    -> Result<(), Self::Error>;

    async fn get_policy(&self, id: &PolicyId) -> Result<Option<PolicyDocument>, Self::Error>;

    /// Every policy whose subject type is `device`, by id.
    async fn device_policies(&self) -> Result<Vec<PolicyDocument>, Self::Error>;

    async fn record_distribution(&self, entry: DistributionLogEntry) -> Result<(), Self::Error>;

    async fn fail_distribution(&self, id: DistributionId, error: &str)
    -> Result<(), Self::Error>;

    /// Marks pending entries for the pair as acknowledged. Returns how many
    /// rows changed; zero is not an error.
    async fn acknowledge(
        &self,
        policy: &PolicyId,
        cabinet: &CabinetId,
        at: Timestamp,
    ) -> Result<usize, Self::Error>;

    /// Oldest first.
    async fn distributions_for(
        &self,
        policy: &PolicyId,
    ) -> Result<Vec<DistributionLogEntry>, Self::Error>;
}

/// Received telemetry. Everything is keyed by the edge-local id, so a
/// redelivered row is ignored.
#[async_trait]
pub trait TelemetryRegistry: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns how many samples were new.
    async fn store_samples(
        &self,
        cabinet: &CabinetId,
        samples: &[SensorReport],
        at: Timestamp,
    ) -> Result<usize, Self::Error>;

    /// Returns how many entries were new.
    async fn store_access_logs(
        &self,
        cabinet: &CabinetId,
        logs: &[AccessLogReport],
    ) -> Result<usize, Self::Error>;

    async fn store_assessment(&self, report: &VulnerabilityReport) -> Result<(), Self::Error>;

    async fn latest_assessment(
        &self,
        cabinet: &CabinetId,
    ) -> Result<Option<VulnerabilityReport>, Self::Error>;

    async fn counts(&self, cabinet: &CabinetId) -> Result<TelemetryCounts, Self::Error>;
}

/// One backend's full set of registries.
pub trait Registries: Clone + Send + Sync + 'static {
    type Cabinets: CabinetRegistry;
    type Commands: CommandRegistry;
    type Alerts: AlertRegistry;
    type Policies: PolicyRegistry;
    type Telemetry: TelemetryRegistry;

    fn cabinets(&self) -> &Self::Cabinets;
    fn commands(&self) -> &Self::Commands;
    fn alerts(&self) -> &Self::Alerts;
    fn policies(&self) -> &Self::Policies;
    fn telemetry(&self) -> &Self::Telemetry;
}

/// Type-erased registry error for service-level error enums.
pub type RegistryError = Box<dyn std::error::Error + Send + Sync>;

pub(crate) fn boxed(e: impl std::error::Error + Send + Sync + 'static) -> RegistryError {
    Box::new(e)
}
