use ampere_core::CabinetId;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::{LiveValue, TrafficSnapshot};
use crate::registry::models::{Cabinet, TelemetryCounts};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

pub fn success_response<T: Serialize>(
    status: StatusCode,
    data: T,
    message: Option<String>,
) -> Response {
    let api_response = ApiResponse {
        success: true,
        data: Some(data),
        message,
    };
    (status, Json(api_response)).into_response()
}

fn default_operator() -> String {
    "api".to_owned()
}

#[derive(Debug, Deserialize)]
pub struct CabinetCreateRequest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

/// The API key is only ever returned here.
#[derive(Debug, Serialize)]
pub struct CabinetCreatedResponse {
    #[serde(flatten)]
    pub cabinet: Cabinet,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct CommandCreateRequest {
    pub command_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "default_operator")]
    pub created_by: String,
}

#[derive(Debug, Deserialize)]
pub struct LicensePushRequest {
    pub license_token: String,
    #[serde(default = "default_operator")]
    pub created_by: String,
}

#[derive(Debug, Deserialize)]
pub struct OperatorRequest {
    #[serde(default = "default_operator")]
    pub operator: String,
}

#[derive(Debug, Deserialize)]
pub struct DistributeRequest {
    pub cabinet_ids: Vec<CabinetId>,
    #[serde(default = "default_operator")]
    pub operator: String,
}

#[derive(Debug, Deserialize)]
pub struct CommandListParams {
    #[serde(default = "default_command_limit")]
    pub limit: usize,
}

fn default_command_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct AlertListParams {
    #[serde(default)]
    pub cabinet_id: Option<CabinetId>,
    #[serde(default)]
    pub include_resolved: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub bus_connected: bool,
    pub published: u64,
    pub publish_failures: u64,
    pub bus_success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct CabinetTrafficResponse {
    pub cabinet_id: CabinetId,
    pub traffic: Option<TrafficSnapshot>,
    pub sensors: Vec<LiveValue>,
}

#[derive(Debug, Serialize)]
pub struct TelemetryResponse {
    pub cabinet_id: CabinetId,
    pub last_sync_at: Option<jiff::Timestamp>,
    pub counts: TelemetryCounts,
    pub latest_assessment: Option<ampere_core::VulnerabilityReport>,
}
