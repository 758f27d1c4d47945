pub mod ack;
pub mod aggregate;
pub mod api;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod ledger;
pub mod registry;
pub mod subscriber;

use std::sync::Arc;
use std::time::Duration;

use ampere_bus::MessageBus;

pub use ack::{AckHandler, AckOutcome};
pub use aggregate::LiveAggregates;
pub use config::{Config, RegistryConfig};
pub use dispatch::{CommandDispatcher, DispatchSettings, run_timeout_sweep};
pub use ingest::Ingest;
pub use ledger::PolicyLedger;
pub use registry::Registries;
pub use registry::memory::InMemoryRegistries;
pub use registry::sqlite::SqliteRegistries;
pub use subscriber::{Subscriber, run_subscriber};

// AppState must be defined in lib.rs to be visible to all modules
#[derive(Clone)]
pub struct AppState<R> {
    pub registries: R,
    pub dispatcher: CommandDispatcher<R>,
    pub ledger: PolicyLedger<R>,
    pub ingest: Ingest<R>,
    pub acks: AckHandler<R>,
    pub aggregates: LiveAggregates,
    pub bus: Arc<dyn MessageBus>,
}

impl<R: Registries> AppState<R> {
    pub fn new(
        registries: R,
        dispatcher: CommandDispatcher<R>,
        bus: Arc<dyn MessageBus>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            ledger: PolicyLedger::new(registries.clone(), Arc::clone(&bus), publish_timeout),
            ingest: Ingest::new(registries.clone()),
            acks: AckHandler::new(registries.clone()),
            aggregates: LiveAggregates::new(),
            registries,
            dispatcher,
            bus,
        }
    }

    /// Bus subscriber sharing this state's services and live aggregates.
    pub fn subscriber(&self) -> Subscriber<R> {
        Subscriber {
            ingest: self.ingest.clone(),
            acks: self.acks.clone(),
            ledger: self.ledger.clone(),
            aggregates: self.aggregates.clone(),
        }
    }
}
