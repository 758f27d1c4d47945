pub mod api;
pub mod assessment;
pub mod cloud;
pub mod collector;
pub mod command;
pub mod config;
pub mod credentials;
pub mod license;
pub mod policy;
pub mod push;
pub mod reconcile;
pub mod source;
pub mod state;
pub mod storage;
pub mod traffic;

pub use cloud::CloudClient;
pub use collector::Collector;
pub use command::{Acknowledger, CommandExecutor};
pub use config::{Config, StorageConfig};
pub use credentials::{CredentialProvider, Credentials};
pub use license::{LicenseService, StoredLicense};
pub use policy::PolicySync;
pub use push::{AlertPusher, PushOutcome};
pub use reconcile::{ReconcileSettings, Reconciler};
pub use source::mock::MockSensorSource;
pub use source::{Reading, SensorSource};
pub use state::EdgeState;
pub use storage::EdgeStore;
pub use storage::memory::MemoryStore;
pub use storage::sqlite::SqliteStore;
