use ampere_core::{PolicyDocument, PolicyId};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};

use super::error::ApiError;
use super::models::{DistributeRequest, OperatorRequest, success_response};
use crate::AppState;
use crate::registry::Registries;

pub async fn save_policy<R: Registries>(
    State(state): State<AppState<R>>,
    Json(policy): Json<PolicyDocument>,
) -> Result<Response, ApiError> {
    if policy.id.as_str().trim().is_empty() {
        return Err(ApiError::BadRequest("policy id must not be empty".into()));
    }

    let id = policy.id.clone();
    state.ledger.save(policy).await?;
    Ok(success_response(
        StatusCode::CREATED,
        id,
        Some("policy saved".into()),
    ))
}

pub async fn distribute<R: Registries>(
    State(state): State<AppState<R>>,
    Path(id): Path<PolicyId>,
    Json(request): Json<DistributeRequest>,
) -> Result<Response, ApiError> {
    let result = state
        .ledger
        .distribute(&id, &request.cabinet_ids, &request.operator)
        .await?;
    Ok(success_response(StatusCode::OK, result, None))
}

pub async fn broadcast<R: Registries>(
    State(state): State<AppState<R>>,
    Path(id): Path<PolicyId>,
    Json(request): Json<OperatorRequest>,
) -> Result<Response, ApiError> {
    let result = state.ledger.broadcast(&id, &request.operator).await?;
    Ok(success_response(StatusCode::OK, result, None))
}

pub async fn distributions<R: Registries>(
    State(state): State<AppState<R>>,
    Path(id): Path<PolicyId>,
) -> Result<Response, ApiError> {
    let entries = state.ledger.distributions(&id).await?;
    Ok(success_response(StatusCode::OK, entries, None))
}
