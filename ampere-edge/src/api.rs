//! Local operator API of the edge node.

use std::sync::Arc;

use ampere_core::{CabinetId, EdgeAlertId};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{error, info};

use crate::credentials::CredentialProvider;
use crate::push::AlertPusher;
use crate::state::{EdgeState, SyncStatus};
use crate::storage::{EdgeStore, StoreStats};

#[derive(Clone)]
pub struct AppState<S> {
    pub cabinet: CabinetId,
    pub store: S,
    pub credentials: CredentialProvider<S>,
    pub pusher: Arc<AlertPusher<S>>,
    pub state: EdgeState,
    pub sync_trigger: Arc<Notify>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub cabinet_id: CabinetId,
    pub uptime_secs: u64,
    pub commands_executed: u64,
    pub sync: SyncStatus,
    pub store: Option<StoreStats>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialsUpdateRequest {
    pub api_key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct AlertListParams {
    #[serde(default)]
    pub include_resolved: bool,
}

fn error_response(status: StatusCode, message: String) -> Response {
    let api_response = ApiResponse::<()> {
        success: false,
        data: None,
        message: Some(message),
    };
    (status, Json(api_response)).into_response()
}

fn success_response<T: Serialize>(status: StatusCode, data: T, message: Option<String>) -> Response {
    let api_response = ApiResponse {
        success: true,
        data: Some(data),
        message,
    };
    (status, Json(api_response)).into_response()
}

pub fn router<S: EdgeStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/health", get(health::<S>))
        .route(
            "/credentials",
            get(get_credentials::<S>).put(update_credentials::<S>),
        )
        .route("/alerts", get(list_alerts::<S>))
        .route("/alerts/{id}/resolve", post(resolve_alert::<S>))
        .route("/sync", post(trigger_sync::<S>))
}

async fn health<S: EdgeStore>(State(app): State<AppState<S>>) -> Response {
    let store = match app.store.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            error!(error = %e, "Failed to read store stats");
            None
        }
    };

    let health = HealthResponse {
        cabinet_id: app.cabinet.clone(),
        uptime_secs: app.state.uptime_secs().await,
        commands_executed: app.state.commands_executed().await,
        sync: app.state.sync_status().await,
        store,
    };
    success_response(StatusCode::OK, health, None)
}

async fn get_credentials<S: EdgeStore>(State(app): State<AppState<S>>) -> Response {
    match app.credentials.masked().await {
        Ok(masked) => success_response(StatusCode::OK, masked, None),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn update_credentials<S: EdgeStore>(
    State(app): State<AppState<S>>,
    Json(request): Json<CredentialsUpdateRequest>,
) -> Response {
    if request.api_key.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "api_key must not be empty".into());
    }

    if let Err(e) = app
        .credentials
        .update(request.api_key, request.endpoint, request.enabled)
        .await
    {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    match app.credentials.masked().await {
        Ok(masked) => success_response(StatusCode::OK, masked, Some("credentials updated".into())),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn list_alerts<S: EdgeStore>(
    State(app): State<AppState<S>>,
    Query(params): Query<AlertListParams>,
) -> Response {
    match app.store.list_alerts(params.include_resolved).await {
        Ok(alerts) => success_response(StatusCode::OK, alerts, None),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn resolve_alert<S: EdgeStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<i64>,
) -> Response {
    let id = EdgeAlertId(id);

    match app.store.get_alert(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, format!("alert {id} not found")),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }

    let alert = match app.store.resolve_alert(id, Timestamp::now()).await {
        Ok(alert) => alert,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    info!(alert_id = %id, "Alert resolved locally");

    // The resolution travels upstream on the push path, or with the next cycle.
    let pusher = Arc::clone(&app.pusher);
    let pushed = alert.clone();
    tokio::spawn(async move {
        pusher.push(&pushed).await;
    });

    success_response(StatusCode::OK, alert, Some("alert resolved".into()))
}

async fn trigger_sync<S: EdgeStore>(State(app): State<AppState<S>>) -> Response {
    app.sync_trigger.notify_one();
    success_response(StatusCode::ACCEPTED, (), Some("sync triggered".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CloudClient;
    use crate::credentials::Credentials;
    use crate::storage::memory::MemoryStore;
    use crate::storage::models::AlertCondition;
    use ampere_bus::{HttpClient, MemoryBus};
    use ampere_core::EdgeSeverity;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn serve(store: MemoryStore) -> (String, Arc<Notify>) {
        let cabinet: CabinetId = "CAB-1".into();
        let credentials = CredentialProvider::new(
            store.clone(),
            Credentials {
                cabinet_id: cabinet.clone(),
                api_key: "config-key-abcdef".into(),
                endpoint: "http://127.0.0.1:9".into(),
            },
        );
        let cloud = Arc::new(CloudClient::new(
            HttpClient::new(Duration::from_millis(200), "test").unwrap(),
            credentials.clone(),
            true,
        ));
        let pusher = Arc::new(AlertPusher::new(
            store.clone(),
            Arc::new(MemoryBus::new()),
            cabinet.clone(),
            cloud,
            Duration::from_secs(1),
        ));
        let trigger = Arc::new(Notify::new());
        let app = router().with_state(AppState {
            cabinet,
            store,
            credentials,
            pusher,
            state: EdgeState::new(),
            sync_trigger: Arc::clone(&trigger),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), trigger)
    }

    #[tokio::test]
    async fn credentials_are_masked() {
        let (base, _) = serve(MemoryStore::new()).await;
        let client = reqwest::Client::new();

        let body: serde_json::Value = client
            .get(format!("{base}/credentials"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["data"]["api_key"], "conf****cdef");
        assert_eq!(body["data"]["source"], "config");

        let body: serde_json::Value = client
            .put(format!("{base}/credentials"))
            .json(&serde_json::json!({"api_key": "short"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["data"]["api_key"], "***");
        assert_eq!(body["data"]["source"], "store");
    }

    #[tokio::test]
    async fn resolve_unknown_alert_is_404() {
        let (base, _) = serve(MemoryStore::new()).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/alerts/77/resolve"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn resolve_marks_alert_pending_again() {
        let store = MemoryStore::new();
        let alert = store
            .upsert_alert(AlertCondition {
                device_id: "dev-1".into(),
                alert_type: "soc_low".into(),
                severity: EdgeSeverity::Low,
                message: "soc low".into(),
                value: 5.0,
                threshold: 10.0,
                timestamp: Timestamp::now(),
            })
            .await
            .unwrap();
        let (base, _) = serve(store.clone()).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/alerts/{}/resolve", alert.id))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());

        let stored = store.get_alert(alert.id).await.unwrap().unwrap();
        assert!(stored.resolved);
        assert!(store.list_alerts(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_endpoint_wakes_the_loop() {
        let (base, trigger) = serve(MemoryStore::new()).await;
        let waiter = tokio::spawn(async move { trigger.notified().await });

        let response = reqwest::Client::new()
            .post(format!("{base}/sync"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
