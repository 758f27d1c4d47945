//! Routes the edge calls on the fallback and reconciliation paths. All of
//! them require the bearer key of the cabinet in the path.

use ampere_core::{CabinetId, CabinetMetadata, SyncPayload, VulnerabilityReport};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
};

use super::error::ApiError;
use super::models::success_response;
use crate::AppState;
use crate::auth::authorize;
use crate::ingest::IngestError;
use crate::registry::Registries;

pub async fn sync_batch<R: Registries>(
    State(state): State<AppState<R>>,
    Path(cabinet): Path<CabinetId>,
    headers: HeaderMap,
    Json(payload): Json<SyncPayload>,
) -> Result<Response, ApiError> {
    authorize(state.registries.cabinets(), &headers, &cabinet).await?;

    let summary = state.ingest.sync(&cabinet, &payload).await?;
    Ok(success_response(StatusCode::OK, summary, None))
}

pub async fn sync_alerts<R: Registries>(
    State(state): State<AppState<R>>,
    Path(cabinet): Path<CabinetId>,
    headers: HeaderMap,
    Json(payload): Json<SyncPayload>,
) -> Result<Response, ApiError> {
    authorize(state.registries.cabinets(), &headers, &cabinet).await?;
    if payload.cabinet_id != cabinet {
        return Err(IngestError::CabinetMismatch {
            payload: payload.cabinet_id,
            sender: cabinet,
        }
        .into());
    }

    let alerts = state.ingest.alerts(&cabinet, &payload.alerts).await?;
    Ok(success_response(StatusCode::OK, alerts, None))
}

pub async fn sync_metadata<R: Registries>(
    State(state): State<AppState<R>>,
    Path(cabinet): Path<CabinetId>,
    headers: HeaderMap,
    Json(metadata): Json<CabinetMetadata>,
) -> Result<Response, ApiError> {
    authorize(state.registries.cabinets(), &headers, &cabinet).await?;

    state.ingest.metadata(&cabinet, &metadata).await?;
    Ok(success_response(
        StatusCode::OK,
        (),
        Some("metadata updated".into()),
    ))
}

pub async fn sync_vulnerability<R: Registries>(
    State(state): State<AppState<R>>,
    Path(cabinet): Path<CabinetId>,
    headers: HeaderMap,
    Json(report): Json<VulnerabilityReport>,
) -> Result<Response, ApiError> {
    authorize(state.registries.cabinets(), &headers, &cabinet).await?;

    state.ingest.vulnerability(&cabinet, report).await?;
    Ok(success_response(
        StatusCode::OK,
        (),
        Some("assessment stored".into()),
    ))
}
