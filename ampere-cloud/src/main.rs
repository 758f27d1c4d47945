use std::path::PathBuf;
use std::sync::Arc;

use ampere_bus::{BusConfig, DisconnectedBus, MessageBus, MqttBus};
use ampere_cloud::{
    AppState, CommandDispatcher, Config, InMemoryRegistries, Registries, RegistryConfig,
    SqliteRegistries, api, run_subscriber, run_timeout_sweep,
};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ampere-cloud")]
#[command(about = "Ampere control plane")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "ampere-cloud.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tracing=info,ampere_cloud=info,ampere_bus=info".to_owned());
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
        http_addr = %config.server.http_addr,
        command_timeout_secs = config.dispatch.command_timeout_secs,
        "Starting ampere-cloud"
    );

    let cancel = CancellationToken::new();

    let (bus, bus_handle): (Arc<dyn MessageBus>, Option<JoinHandle<()>>) = match &config.bus {
        BusConfig::Mqtt(mqtt) => {
            let (bus, handle) = MqttBus::connect(mqtt, cancel.clone());
            (Arc::new(bus), Some(handle))
        }
        BusConfig::Disabled => {
            warn!("Message bus disabled, commands will fail to publish");
            (Arc::new(DisconnectedBus::default()), None)
        }
    };

    match &config.registry {
        RegistryConfig::Memory => {
            info!("Using in-memory registries");
            run_cloud(&config, InMemoryRegistries::new(), bus, cancel).await?;
        }
        RegistryConfig::Sqlite { path } => {
            info!(path = ?path, "Using SQLite registries");
            let path = path.to_string_lossy().into_owned();
            let registries = SqliteRegistries::new(path).await?;
            run_cloud(&config, registries, bus, cancel).await?;
        }
    }

    if let Some(handle) = bus_handle {
        let _ = handle.await;
    }

    info!("ampere-cloud shut down complete");
    Ok(())
}

async fn run_cloud<R: Registries>(
    config: &Config,
    registries: R,
    bus: Arc<dyn MessageBus>,
    cancel: CancellationToken,
) -> color_eyre::Result<()> {
    let (dispatcher, dispatch_handle) = CommandDispatcher::spawn(
        registries.clone(),
        Arc::clone(&bus),
        config.dispatch.settings(),
        cancel.clone(),
    );

    let sweep_handle = tokio::spawn(run_timeout_sweep(
        registries.commands().clone(),
        config.dispatch.command_timeout(),
        config.dispatch.sweep_interval(),
        cancel.clone(),
    ));

    let state = AppState::new(
        registries,
        dispatcher,
        Arc::clone(&bus),
        config.dispatch.publish_timeout(),
    );

    let subscriber_handle = {
        let subscriber = state.subscriber();
        let bus = Arc::clone(&bus);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = run_subscriber(subscriber, bus, cancel).await {
                error!(error = %e, "Bus subscriber failed to start");
            }
        })
    };

    let http_addr = config.server.http_addr;
    let app = api::router().with_state(state);
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
    let _ = dispatch_handle.await;
    let _ = sweep_handle.await;
    let _ = subscriber_handle.await;

    Ok(())
}
