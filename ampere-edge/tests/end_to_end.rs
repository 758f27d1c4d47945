//! An edge node and the control plane sharing one in-process bus.

use std::sync::Arc;
use std::time::Duration;

use ampere_bus::{HttpClient, MemoryBus, MessageBus};
use ampere_cloud::registry::models::{AlertFilter, Cabinet};
use ampere_cloud::registry::{AlertRegistry, CabinetRegistry, CommandRegistry};
use ampere_cloud::{AppState, CommandDispatcher, DispatchSettings, InMemoryRegistries, api};
use ampere_core::{CabinetId, CabinetMetadata, CommandStatus, EdgeSeverity, topic};
use ampere_edge::command::run_command_loop;
use ampere_edge::config::ThresholdConfig;
use ampere_edge::storage::models::NewSample;
use ampere_edge::{
    Acknowledger, AlertPusher, CloudClient, Collector, CommandExecutor, CredentialProvider,
    Credentials, EdgeState, EdgeStore, MemoryStore, PushOutcome, ReconcileSettings, Reconciler,
};
use jiff::Timestamp;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const API_KEY: &str = "e2e-key-0123456789abcdef0123456";

async fn start_cloud(
    bus: &MemoryBus,
    cancel: &CancellationToken,
) -> (String, InMemoryRegistries) {
    let registries = InMemoryRegistries::new();
    registries
        .cabinets
        .register(Cabinet {
            id: "CAB-1".into(),
            name: None,
            api_key: API_KEY.into(),
            location: None,
            ip_address: None,
            firmware_version: None,
            created_at: Timestamp::now(),
            last_sync_at: None,
        })
        .await
        .unwrap();

    let shared: Arc<dyn MessageBus> = Arc::new(bus.clone());
    let (dispatcher, _) = CommandDispatcher::spawn(
        registries.clone(),
        Arc::clone(&shared),
        DispatchSettings::default(),
        cancel.clone(),
    );
    let state = AppState::new(
        registries.clone(),
        dispatcher,
        Arc::clone(&shared),
        Duration::from_secs(1),
    );
    tokio::spawn(ampere_cloud::run_subscriber(
        state.subscriber(),
        shared,
        cancel.clone(),
    ));

    let app = api::router().with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .unwrap();
    });

    (format!("http://{addr}"), registries)
}

fn cloud_client(store: &MemoryStore, endpoint: &str, enabled: bool) -> Arc<CloudClient<MemoryStore>> {
    let credentials = CredentialProvider::new(
        store.clone(),
        Credentials {
            cabinet_id: "CAB-1".into(),
            api_key: API_KEY.into(),
            endpoint: endpoint.to_owned(),
        },
    );
    Arc::new(CloudClient::new(
        HttpClient::new(Duration::from_secs(2), "ampere-e2e").unwrap(),
        credentials,
        enabled,
    ))
}

fn temperature(value: f64) -> NewSample {
    NewSample {
        device_id: "dev-7".into(),
        sensor_type: "temperature".into(),
        value,
        unit: "C".into(),
        quality: 100,
        timestamp: Timestamp::now(),
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn offline_breaches_reconcile_and_resolve_from_the_cloud() {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let bus = MemoryBus::new();
    let (base, cloud_registries) = start_cloud(&bus, &cancel).await;
    // Let the cloud subscriptions register
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cabinet: CabinetId = "CAB-1".into();
    let store = MemoryStore::new();
    let edge_bus: Arc<dyn MessageBus> = Arc::new(bus.clone());

    // Broker and uplink both down while the breaches happen
    bus.set_online(false);
    let offline = cloud_client(&store, "http://127.0.0.1:9", false);
    let pusher = Arc::new(AlertPusher::new(
        store.clone(),
        Arc::clone(&edge_bus),
        cabinet.clone(),
        offline,
        Duration::from_millis(100),
    ));
    let collector = Collector::new(
        store.clone(),
        Arc::clone(&pusher),
        Arc::clone(&edge_bus),
        cabinet.clone(),
        vec![ThresholdConfig {
            sensor_type: "temperature".into(),
            alert_type: "temperature_high".into(),
            min: None,
            max: Some(55.0),
            severity: EdgeSeverity::High,
        }],
    );
    for value in [58.0, 61.0, 64.5] {
        let alert = collector.record(temperature(value)).await.unwrap();
        assert!(alert.is_some());
    }
    let edge_alerts = store.list_alerts(false).await.unwrap();
    assert_eq!(edge_alerts.len(), 1);
    let edge_alert_id = edge_alerts[0].id;
    assert_eq!(store.pending_alerts(10).await.unwrap().len(), 1);

    // Reconnect and run one reconcile cycle
    bus.set_online(true);
    let online = cloud_client(&store, &base, true);
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::clone(&online),
        Arc::clone(&edge_bus),
        cabinet.clone(),
        CabinetMetadata::default(),
        ReconcileSettings {
            retry_interval: Duration::from_millis(10),
            ..ReconcileSettings::default()
        },
        EdgeState::new(),
        Arc::new(Notify::new()),
    );
    let report = reconciler.cycle().await.unwrap();
    assert_eq!(report.samples, 3);
    assert_eq!(report.alerts, 1);
    assert!(store.pending_alerts(10).await.unwrap().is_empty());

    let cloud_alerts = cloud_registries
        .alerts
        .list(&AlertFilter::default())
        .await
        .unwrap();
    assert_eq!(cloud_alerts.len(), 1);
    let cloud_alert = cloud_alerts[0].clone();
    assert_eq!(cloud_alert.details["sensor_value"], 64.5);
    assert_eq!(cloud_alert.edge_alert_id, Some(edge_alert_id));

    // Edge command handling, acknowledgments go back over the bus
    let commands = edge_bus
        .subscribe(&topic::commands_filter(&cabinet))
        .await
        .unwrap();
    let executor = CommandExecutor::new(store.clone(), None, EdgeState::new());
    let acknowledger = Acknowledger::new(
        Arc::clone(&edge_bus),
        cabinet.clone(),
        Arc::clone(&online),
        Duration::from_secs(1),
    );
    tokio::spawn(run_command_loop(executor, acknowledger, commands, cancel.clone()));

    let response = reqwest::Client::new()
        .post(format!("{base}/alerts/{}/resolve", cloud_alert.id))
        .json(&json!({ "operator": "alice" }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    let command_id = ampere_core::CommandId(body["data"]["id"].as_str().unwrap().parse().unwrap());

    eventually(|| {
        let store = store.clone();
        async move {
            store
                .get_alert(edge_alert_id)
                .await
                .unwrap()
                .is_some_and(|a| a.resolved)
        }
    })
    .await;
    eventually(|| {
        let registries = cloud_registries.clone();
        async move {
            registries
                .commands
                .get(command_id)
                .await
                .unwrap()
                .is_some_and(|c| c.status == CommandStatus::Success)
        }
    })
    .await;

    // The edge reports its resolution on the next cycle; attribution stays
    reconciler.cycle().await.unwrap();
    let resolved = cloud_registries
        .alerts
        .get(cloud_alert.id)
        .await
        .unwrap()
        .unwrap();
    assert!(resolved.resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));
    assert!(store.list_alerts(false).await.unwrap().is_empty());

    let acks = bus.published_on(topic::COMMAND_RESPONSES_FILTER);
    assert_eq!(acks.len(), 1);
}

#[tokio::test]
async fn online_breach_is_pushed_over_the_bus() {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let bus = MemoryBus::new();
    let (_, cloud_registries) = start_cloud(&bus, &cancel).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let store = MemoryStore::new();
    let edge_bus: Arc<dyn MessageBus> = Arc::new(bus.clone());
    let pusher = AlertPusher::new(
        store.clone(),
        edge_bus,
        "CAB-1".into(),
        cloud_client(&store, "http://127.0.0.1:9", false),
        Duration::from_secs(1),
    );

    let alert = store
        .upsert_alert(ampere_edge::storage::models::AlertCondition {
            device_id: "dev-2".into(),
            alert_type: "soc_low".into(),
            severity: EdgeSeverity::Medium,
            message: "soc 4 below 10".into(),
            value: 4.0,
            threshold: 10.0,
            timestamp: Timestamp::now(),
        })
        .await
        .unwrap();
    assert_eq!(pusher.push(&alert).await, PushOutcome::Delivered("bus"));

    eventually(|| {
        let registries = cloud_registries.clone();
        async move {
            !registries
                .alerts
                .list(&AlertFilter::default())
                .await
                .unwrap()
                .is_empty()
        }
    })
    .await;
    assert!(store.pending_alerts(10).await.unwrap().is_empty());
}
