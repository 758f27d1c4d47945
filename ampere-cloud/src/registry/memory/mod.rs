mod alert;
mod cabinet;
mod command;
mod policy;
mod telemetry;

pub use alert::InMemoryAlertRegistry;
pub use cabinet::InMemoryCabinetRegistry;
pub use command::InMemoryCommandRegistry;
pub use policy::InMemoryPolicyRegistry;
pub use telemetry::InMemoryTelemetryRegistry;

use super::Registries;

/// In-memory backend. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryRegistries {
    pub cabinets: InMemoryCabinetRegistry,
    pub commands: InMemoryCommandRegistry,
    pub alerts: InMemoryAlertRegistry,
    pub policies: InMemoryPolicyRegistry,
    pub telemetry: InMemoryTelemetryRegistry,
}

impl InMemoryRegistries {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registries for InMemoryRegistries {
    type Cabinets = InMemoryCabinetRegistry;
    type Commands = InMemoryCommandRegistry;
    type Alerts = InMemoryAlertRegistry;
    type Policies = InMemoryPolicyRegistry;
    type Telemetry = InMemoryTelemetryRegistry;

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
