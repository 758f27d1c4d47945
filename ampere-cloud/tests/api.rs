use std::sync::Arc;
use std::time::Duration;

use ampere_bus::{MemoryBus, MessageBus};
use ampere_cloud::registry::models::Command;
use ampere_cloud::registry::{AlertRegistry, CommandRegistry};
use ampere_cloud::{AppState, CommandDispatcher, DispatchSettings, InMemoryRegistries, api};
use ampere_core::{
    AlertReport, CloudSeverity, CommandMessage, CommandStatus, EdgeAlertId, SampleId,
    SensorReport, SyncPayload,
};
use jiff::Timestamp;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct TestCloud {
    base: String,
    registries: InMemoryRegistries,
    bus: MemoryBus,
    client: reqwest::Client,
    _cancel: tokio_util::sync::DropGuard,
}

impl TestCloud {
    async fn start() -> Self {
        let registries = InMemoryRegistries::new();
        let bus = MemoryBus::new();
        let shared: Arc<dyn MessageBus> = Arc::new(bus.clone());
        let cancel = CancellationToken::new();

        let (dispatcher, _) = CommandDispatcher::spawn(
            registries.clone(),
            Arc::clone(&shared),
            DispatchSettings::default(),
            cancel.clone(),
        );
        let state = AppState::new(registries.clone(), dispatcher, shared, Duration::from_secs(1));
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

        Self {
            base: format!("http://{addr}"),
            registries,
            bus,
            client: reqwest::Client::new(),
            _cancel: cancel.drop_guard(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Registers a cabinet and returns its API key.
    async fn register(&self, id: &str) -> String {
        let response = self
            .client
            .post(self.url("/cabinets"))
            .json(&json!({ "id": id, "name": format!("cabinet {id}") }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = response.json().await.unwrap();
        body["data"]["api_key"].as_str().unwrap().to_owned()
    }

    async fn wait_for_status(&self, command: &Command, status: CommandStatus) {
        for _ in 0..100 {
            let stored = self.registries.commands.get(command.id).await.unwrap().unwrap();
            if stored.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("command {} never reached {}", command.id, status.as_str());
    }
}

fn payload(cabinet: &str, sample_ids: &[i64], alerts: Vec<AlertReport>) -> SyncPayload {
    SyncPayload {
        cabinet_id: cabinet.into(),
        timestamp: Timestamp::now(),
        sensor_data: sample_ids
            .iter()
            .map(|&id| SensorReport {
                id: SampleId(id),
                device_id: "dev-1".into(),
                sensor_type: "temperature".into(),
                value: 24.5,
                unit: "C".into(),
                quality: 100,
                timestamp: Timestamp::now(),
            })
            .collect(),
        alerts,
    }
}

fn breach(edge_id: Option<i64>) -> AlertReport {
    AlertReport {
        alert_id: edge_id.map(EdgeAlertId),
        device_id: "dev-7".into(),
        alert_type: "temperature_high".into(),
        severity: CloudSeverity::Critical,
        message: "temperature 71 above 55".into(),
        value: 71.0,
        threshold: 55.0,
        timestamp: Timestamp::now(),
        resolved: false,
        resolved_at: None,
    }
}

#[tokio::test]
async fn registration_hands_out_a_key_once() {
    let cloud = TestCloud::start().await;
    let key = cloud.register("CAB-1").await;
    assert_eq!(key.len(), 32);

    let response = cloud
        .client
        .post(cloud.url("/cabinets"))
        .json(&json!({ "id": "CAB-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn sync_requires_the_cabinets_own_key() {
    let cloud = TestCloud::start().await;
    let key_1 = cloud.register("CAB-1").await;
    let key_2 = cloud.register("CAB-2").await;
    let body = payload("CAB-1", &[1, 2], vec![breach(Some(1))]);

    let response = cloud
        .client
        .post(cloud.url("/cabinets/CAB-1/sync"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = cloud
        .client
        .post(cloud.url("/cabinets/CAB-1/sync"))
        .bearer_auth("not-a-key")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = cloud
        .client
        .post(cloud.url("/cabinets/CAB-1/sync"))
        .bearer_auth(&key_2)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = cloud
        .client
        .post(cloud.url("/cabinets/CAB-1/sync"))
        .bearer_auth(&key_1)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["data"]["samples_stored"], 2);
}

#[tokio::test]
async fn redelivered_sync_is_idempotent() {
    let cloud = TestCloud::start().await;
    let key = cloud.register("CAB-1").await;
    let body = payload("CAB-1", &[1, 2, 3], vec![breach(Some(9))]);

    for expected in [3, 0] {
        let summary: Value = cloud
            .client
            .post(cloud.url("/cabinets/CAB-1/sync"))
            .bearer_auth(&key)
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(summary["data"]["samples_stored"], expected);
        assert_eq!(summary["data"]["samples_received"], 3);
    }

    let telemetry: Value = cloud
        .client
        .get(cloud.url("/cabinets/CAB-1/telemetry"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(telemetry["data"]["counts"]["samples"], 3);
    assert!(telemetry["data"]["last_sync_at"].is_string());

    let alerts: Value = cloud
        .client
        .get(cloud.url("/alerts?cabinet_id=CAB-1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn metadata_and_mismatched_alert_payloads() {
    let cloud = TestCloud::start().await;
    let key = cloud.register("CAB-1").await;

    let response = cloud
        .client
        .put(cloud.url("/cabinets/CAB-1/sync"))
        .bearer_auth(&key)
        .json(&json!({ "firmware_version": "2.0.1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = cloud
        .client
        .post(cloud.url("/cabinets/CAB-1/alerts/sync"))
        .bearer_auth(&key)
        .json(&payload("CAB-9", &[], vec![breach(Some(1))]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn command_round_trip_over_http_ack() {
    let cloud = TestCloud::start().await;
    let key_1 = cloud.register("CAB-1").await;
    let key_2 = cloud.register("CAB-2").await;

    let response = cloud
        .client
        .post(cloud.url("/commands/CAB-1"))
        .json(&json!({ "command_type": "restart", "payload": { "delay": 5 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    let command_id = body["data"]["id"].as_str().unwrap().to_owned();
    let command = cloud
        .registries
        .commands
        .get(ampere_core::CommandId(command_id.parse().unwrap()))
        .await
        .unwrap()
        .unwrap();

    cloud.wait_for_status(&command, CommandStatus::Sent).await;
    let published = cloud.bus.published_on("control-plane/cabinets/CAB-1/commands/+");
    assert_eq!(published.len(), 1);
    let message: CommandMessage = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(message.command_id, command.id.to_string());

    let ack = json!({ "command_id": command_id, "status": "success", "message": "restarted" });
    let response = cloud
        .client
        .post(cloud.url(&format!("/commands/{command_id}/ack")))
        .bearer_auth(&key_2)
        .json(&ack)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = cloud
        .client
        .post(cloud.url(&format!("/commands/{command_id}/ack")))
        .bearer_auth(&key_1)
        .json(&ack)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = cloud
        .client
        .get(cloud.url(&format!("/commands/{command_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["status"], "success");
    assert_eq!(body["data"]["result"], "restarted");

    let listed: Value = cloud
        .client
        .get(cloud.url("/cabinets/CAB-1/commands"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_commands_are_rejected() {
    let cloud = TestCloud::start().await;
    cloud.register("CAB-1").await;

    let response = cloud
        .client
        .post(cloud.url("/commands/CAB-1"))
        .json(&json!({ "command_type": "self_destruct" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = cloud
        .client
        .post(cloud.url("/commands/CAB-404"))
        .json(&json!({ "command_type": "restart" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = cloud
        .client
        .post(cloud.url("/cabinets/CAB-1/license"))
        .json(&json!({ "license_token": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = cloud
        .client
        .get(cloud.url("/commands/not-a-ulid"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn resolving_alerts() {
    let cloud = TestCloud::start().await;
    let key = cloud.register("CAB-1").await;
    let operator = json!({ "operator": "alice" });

    let response = cloud
        .client
        .post(cloud.url("/alerts/garbage/resolve"))
        .json(&operator)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = cloud
        .client
        .post(cloud.url(&format!("/alerts/{}/resolve", ulid::Ulid::new())))
        .json(&operator)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    cloud
        .client
        .post(cloud.url("/cabinets/CAB-1/sync"))
        .bearer_auth(&key)
        .json(&payload("CAB-1", &[], vec![breach(Some(12))]))
        .send()
        .await
        .unwrap();
    let alert = cloud
        .registries
        .alerts
        .list(&Default::default())
        .await
        .unwrap()
        .remove(0);

    let response = cloud
        .client
        .post(cloud.url(&format!("/alerts/{}/resolve", alert.id)))
        .json(&operator)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = cloud.registries.alerts.get(alert.id).await.unwrap().unwrap();
    assert!(stored.resolved);
    assert_eq!(stored.resolved_by.as_deref(), Some("alice"));

    let commands = cloud.bus.published_on("control-plane/cabinets/CAB-1/commands/+");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    let mut commands = commands;
    while commands.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
        commands = cloud.bus.published_on("control-plane/cabinets/CAB-1/commands/+");
    }
    let message: CommandMessage = serde_json::from_slice(&commands[0].payload).unwrap();
    assert_eq!(message.payload["alert_id"], 12);

    let response = cloud
        .client
        .post(cloud.url(&format!("/alerts/{}/resolve", alert.id)))
        .json(&operator)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn alert_without_edge_reference_resolves_on_the_cloud_only() {
    let cloud = TestCloud::start().await;
    let key = cloud.register("CAB-1").await;

    cloud
        .client
        .post(cloud.url("/cabinets/CAB-1/alerts/sync"))
        .bearer_auth(&key)
        .json(&payload("CAB-1", &[], vec![breach(None)]))
        .send()
        .await
        .unwrap();
    let alert = cloud
        .registries
        .alerts
        .list(&Default::default())
        .await
        .unwrap()
        .remove(0);

    let response = cloud
        .client
        .post(cloud.url(&format!("/alerts/{}/resolve", alert.id)))
        .json(&json!({ "operator": "carol" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert!(body["data"].is_null());

    let stored = cloud.registries.alerts.get(alert.id).await.unwrap().unwrap();
    assert!(stored.resolved);
    assert_eq!(stored.resolved_by.as_deref(), Some("carol"));

    // Nothing was queued for the edge
    let commands = cloud
        .registries
        .commands
        .list_for_cabinet(&"CAB-1".into(), 10)
        .await
        .unwrap();
    assert!(commands.is_empty());
}

#[tokio::test]
async fn policies_are_distributed_and_logged() {
    let cloud = TestCloud::start().await;
    cloud.register("CAB-1").await;

    let response = cloud
        .client
        .post(cloud.url("/policies"))
        .json(&json!({
            "id": "fire-safety",
            "name": "fire safety",
            "subject_type": "device",
            "document": { "effect": "deny", "action": "charge" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = cloud
        .client
        .post(cloud.url("/policies/fire-safety/distribute"))
        .json(&json!({ "cabinet_ids": ["CAB-1", "CAB-404"], "operator": "bob" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["success_count"], 1);
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["failures"][0]["cabinet_id"], "CAB-404");

    let response = cloud
        .client
        .post(cloud.url("/policies/unknown/broadcast"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let log: Value = cloud
        .client
        .get(cloud.url("/policies/fire-safety/distributions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = log["data"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e["operator"] == "bob"));
    let delivered = entries.iter().find(|e| e["cabinet_id"] == "CAB-1").unwrap();
    assert_eq!(delivered["status"], "pending");
    let unknown = entries.iter().find(|e| e["cabinet_id"] == "CAB-404").unwrap();
    assert_eq!(unknown["status"], "failed");
    assert!(unknown["error_message"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn health_reports_bus_state() {
    let cloud = TestCloud::start().await;
    cloud.bus.set_online(false);

    let body: Value = cloud
        .client
        .get(cloud.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["bus_connected"], false);

    let traffic: Value = cloud
        .client
        .get(cloud.url("/traffic/CAB-1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(traffic["data"]["traffic"].is_null());
}
