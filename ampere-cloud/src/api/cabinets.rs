use ampere_core::CabinetId;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use jiff::Timestamp;
use tracing::info;

use super::error::{ApiError, internal};
use super::models::{
    CabinetCreateRequest, CabinetCreatedResponse, CommandListParams, LicensePushRequest,
    OperatorRequest, TelemetryResponse, success_response,
};
use crate::AppState;
use crate::auth::generate_api_key;
use crate::registry::models::Cabinet;
use crate::registry::{CabinetRegistry, CommandRegistry, Registries, TelemetryRegistry};

pub async fn register_cabinet<R: Registries>(
    State(state): State<AppState<R>>,
    Json(request): Json<CabinetCreateRequest>,
) -> Result<Response, ApiError> {
    let id = request.id.trim();
    if id.is_empty() {
        return Err(ApiError::BadRequest("cabinet id must not be empty".into()));
    }

    let cabinet = Cabinet {
        id: CabinetId::from(id),
        name: request.name,
        api_key: generate_api_key(),
        location: request.location,
        ip_address: request.ip_address,
        firmware_version: None,
        created_at: Timestamp::now(),
        last_sync_at: None,
    };

    let created = state
        .registries
        .cabinets()
        .register(cabinet.clone())
        .await
        .map_err(internal)?;
    if !created {
        return Err(ApiError::Conflict(format!("cabinet {} already exists", cabinet.id)));
    }

    info!(cabinet_id = %cabinet.id, "Cabinet registered");
    let api_key = cabinet.api_key.clone();
    Ok(success_response(
        StatusCode::CREATED,
        CabinetCreatedResponse { cabinet, api_key },
        Some("cabinet registered".into()),
    ))
}

pub async fn list_commands<R: Registries>(
    State(state): State<AppState<R>>,
    Path(cabinet): Path<CabinetId>,
    Query(params): Query<CommandListParams>,
) -> Result<Response, ApiError> {
    let commands = state
        .registries
        .commands()
        .list_for_cabinet(&cabinet, params.limit.min(500))
        .await
        .map_err(internal)?;

    Ok(success_response(StatusCode::OK, commands, None))
}

pub async fn push_license<R: Registries>(
    State(state): State<AppState<R>>,
    Path(cabinet): Path<CabinetId>,
    Json(request): Json<LicensePushRequest>,
) -> Result<Response, ApiError> {
    let command = state
        .dispatcher
        .push_license(&cabinet, &request.license_token, &request.created_by)
        .await?;

    Ok(success_response(
        StatusCode::CREATED,
        command,
        Some("license push queued".into()),
    ))
}

pub async fn revoke_license<R: Registries>(
    State(state): State<AppState<R>>,
    Path(cabinet): Path<CabinetId>,
) -> Result<Response, ApiError> {
    let command = state.dispatcher.revoke_license(&cabinet, "api").await?;

    Ok(success_response(
        StatusCode::CREATED,
        command,
        Some("license revoke queued".into()),
    ))
}

pub async fn full_sync_policies<R: Registries>(
    State(state): State<AppState<R>>,
    Path(cabinet): Path<CabinetId>,
    Json(request): Json<OperatorRequest>,
) -> Result<Response, ApiError> {
    let result = state.ledger.full_sync(&cabinet, &request.operator).await?;
    Ok(success_response(StatusCode::OK, result, None))
}

pub async fn telemetry<R: Registries>(
    State(state): State<AppState<R>>,
    Path(cabinet): Path<CabinetId>,
) -> Result<Response, ApiError> {
    let found = state
        .registries
        .cabinets()
        .get(&cabinet)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::NotFound(format!("cabinet {cabinet} not found")))?;

    let telemetry = state.registries.telemetry();
    let counts = telemetry.counts(&cabinet).await.map_err(internal)?;
    let latest_assessment = telemetry
        .latest_assessment(&cabinet)
        .await
        .map_err(internal)?;

    Ok(success_response(
        StatusCode::OK,
        TelemetryResponse {
            cabinet_id: cabinet,
            last_sync_at: found.last_sync_at,
            counts,
            latest_assessment,
        },
        None,
    ))
}
