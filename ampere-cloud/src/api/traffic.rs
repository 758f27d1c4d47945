use ampere_core::CabinetId;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};

use super::models::{CabinetTrafficResponse, HealthResponse, success_response};
use crate::AppState;
use crate::registry::Registries;

pub async fn health<R: Registries>(State(state): State<AppState<R>>) -> Response {
    let stats = state.bus.stats();
    let health = HealthResponse {
        status: "ok",
        bus_connected: state.bus.is_connected(),
        published: stats.published,
        publish_failures: stats.failed,
        bus_success_rate: stats.success_rate(),
    };
    success_response(StatusCode::OK, health, None)
}

pub async fn all_traffic<R: Registries>(State(state): State<AppState<R>>) -> Response {
    success_response(StatusCode::OK, state.aggregates.traffic(), None)
}

pub async fn cabinet_traffic<R: Registries>(
    State(state): State<AppState<R>>,
    Path(cabinet): Path<CabinetId>,
) -> Response {
    let response = CabinetTrafficResponse {
        traffic: state.aggregates.traffic_for(&cabinet),
        sensors: state.aggregates.sensors_for(&cabinet),
        cabinet_id: cabinet,
    };
    success_response(StatusCode::OK, response, None)
}
