use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ampere_bus::{BusConfig, DisconnectedBus, HttpClient, MessageBus, MqttBus};
use ampere_core::{CabinetId, CabinetMetadata, mask_api_key, topic};
use ampere_edge::api::{self, AppState};
use ampere_edge::assessment::{Assessor, run_assessor};
use ampere_edge::collector::run_collector;
use ampere_edge::command::run_command_loop;
use ampere_edge::policy::run_policy_loop;
use ampere_edge::traffic::run_traffic_reporter;
use ampere_edge::{
    Acknowledger, AlertPusher, CloudClient, Collector, CommandExecutor, Config, CredentialProvider,
    Credentials, EdgeState, EdgeStore, LicenseService, MemoryStore, MockSensorSource, PolicySync,
    ReconcileSettings, Reconciler, SensorSource, SqliteStore, StorageConfig, StoredLicense,
};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ampere-edge")]
#[command(about = "Ampere cabinet edge node")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "ampere-edge.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tracing=info,ampere_edge=info,ampere_bus=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    info!(
        cabinet_id = %config.cabinet.id,
        http_addr = %config.server.http_addr,
        cloud_endpoint = %config.cloud.endpoint,
        api_key = %mask_api_key(&config.cloud.api_key),
        sync_enabled = config.cloud.enabled,
        "Starting ampere-edge"
    );

    let cancel = CancellationToken::new();

    let (bus, bus_handle): (Arc<dyn MessageBus>, Option<JoinHandle<()>>) = match &config.bus {
        BusConfig::Mqtt(mqtt) => {
            let (bus, handle) = MqttBus::connect(mqtt, cancel.clone());
            (Arc::new(bus), Some(handle))
        }
        BusConfig::Disabled => {
            warn!("Message bus disabled, all upstream traffic goes over HTTP");
            (Arc::new(DisconnectedBus::default()), None)
        }
    };

    match &config.storage {
        StorageConfig::Memory => {
            info!("Using in-memory storage");
            run_edge(config, MemoryStore::new(), bus, cancel).await?;
        }
        StorageConfig::Sqlite { path } => {
            info!(path = ?path, "Using SQLite storage");
            let path = path.to_string_lossy().into_owned();
            let store = SqliteStore::new(path).await?;
            run_edge(config, store, bus, cancel).await?;
        }
    }

    if let Some(handle) = bus_handle {
        let _ = handle.await;
    }

    info!("ampere-edge shut down complete");
    Ok(())
}

async fn run_edge<S: EdgeStore>(
    config: Config,
    store: S,
    bus: Arc<dyn MessageBus>,
    cancel: CancellationToken,
) -> color_eyre::Result<()> {
    let cabinet = CabinetId::from(config.cabinet.id.as_str());
    let state = EdgeState::new();
    let sync_trigger = Arc::new(Notify::new());

    let credentials = CredentialProvider::new(
        store.clone(),
        Credentials {
            cabinet_id: cabinet.clone(),
            api_key: config.cloud.api_key.clone(),
            endpoint: config.cloud.endpoint.clone(),
        },
    );
    let http = HttpClient::new(
        config.cloud.timeout(),
        concat!("ampere-edge/", env!("CARGO_PKG_VERSION")),
    )?;
    let cloud = Arc::new(CloudClient::new(
        http,
        credentials.clone(),
        config.cloud.enabled,
    ));
    let publish_timeout = config.cloud.publish_timeout();

    let pusher = Arc::new(AlertPusher::new(
        store.clone(),
        Arc::clone(&bus),
        cabinet.clone(),
        Arc::clone(&cloud),
        publish_timeout,
    ));

    // Downstream: commands and policy pushes
    let commands = bus.subscribe(&topic::commands_filter(&cabinet)).await?;
    let policies = bus.subscribe(&topic::policy_sync(&cabinet)).await?;

    let license: Arc<dyn LicenseService> = Arc::new(StoredLicense::new(store.clone()));
    let executor = CommandExecutor::new(store.clone(), Some(license), state.clone());
    let acknowledger = Acknowledger::new(
        Arc::clone(&bus),
        cabinet.clone(),
        Arc::clone(&cloud),
        publish_timeout,
    );
    let command_handle = tokio::spawn(run_command_loop(
        executor,
        acknowledger,
        commands,
        cancel.clone(),
    ));

    let policy_sync = PolicySync::new(store.clone(), Arc::clone(&bus), &cabinet);
    let policy_handle = tokio::spawn(run_policy_loop(policy_sync, policies, cancel.clone()));

    // Field data
    let source = MockSensorSource::new(
        config.collector.interval_secs,
        config.collector.device_count,
    );
    let readings = source.start(cancel.clone()).await?;
    let collector = Collector::new(
        store.clone(),
        Arc::clone(&pusher),
        Arc::clone(&bus),
        cabinet.clone(),
        config.collector.thresholds.clone(),
    );
    let collector_handle = tokio::spawn(run_collector(collector, readings, cancel.clone()));

    // Upstream reconciliation
    let metadata = CabinetMetadata {
        name: config.cabinet.name.clone(),
        location: config.cabinet.location.clone(),
        ip_address: config.cabinet.ip_address.clone(),
        firmware_version: Some(env!("CARGO_PKG_VERSION").to_owned()),
    };
    let settings = ReconcileSettings {
        interval: config.cloud.sync_interval(),
        retry_count: config.cloud.retry_count,
        retry_interval: config.cloud.retry_interval(),
        publish_timeout,
        ..ReconcileSettings::default()
    };
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::clone(&cloud),
        Arc::clone(&bus),
        cabinet.clone(),
        metadata,
        settings,
        state.clone(),
        Arc::clone(&sync_trigger),
    );
    let reconcile_handle = tokio::spawn(reconciler.run(cancel.clone()));

    let traffic_handle = tokio::spawn(run_traffic_reporter(
        Arc::clone(&bus),
        cabinet.clone(),
        Duration::from_secs(config.traffic.interval_secs.max(1)),
        cancel.clone(),
    ));

    let assessor = Assessor::new(store.clone(), Arc::clone(&bus), credentials.clone());
    let assessor_handle = tokio::spawn(run_assessor(
        assessor,
        Duration::from_secs(config.assessment.interval_secs.max(1)),
        cancel.clone(),
    ));

    // Local API
    let http_addr = config.server.http_addr;
    let app = api::router().with_state(AppState {
        cabinet,
        store,
        credentials,
        pusher,
        state,
        sync_trigger,
    });
    let listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();

    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }
    cancel.cancel();

    // Wait for background tasks to complete
    let _ = command_handle.await;
    let _ = policy_handle.await;
    let _ = collector_handle.await;
    let _ = reconcile_handle.await;
    let _ = traffic_handle.await;
    let _ = assessor_handle.await;

    Ok(())
}
