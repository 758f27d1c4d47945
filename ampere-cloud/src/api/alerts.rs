use ampere_core::AlertId;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};

use super::error::{ApiError, internal};
use super::models::{AlertListParams, OperatorRequest, success_response};
use crate::AppState;
use crate::registry::models::AlertFilter;
use crate::registry::{AlertRegistry, Registries};

pub async fn list_alerts<R: Registries>(
    State(state): State<AppState<R>>,
    Query(params): Query<AlertListParams>,
) -> Result<Response, ApiError> {
    let filter = AlertFilter {
        cabinet_id: params.cabinet_id,
        include_resolved: params.include_resolved,
    };

    let alerts = state
        .registries
        .alerts()
        .list(&filter)
        .await
        .map_err(internal)?;
    Ok(success_response(StatusCode::OK, alerts, None))
}

/// Resolves the cloud record and, when the edge id is known, sends
/// `resolve_alert` to the owning edge. The command is returned as data.
pub async fn resolve_alert<R: Registries>(
    State(state): State<AppState<R>>,
    Path(id): Path<String>,
    Json(request): Json<OperatorRequest>,
) -> Result<Response, ApiError> {
    let id = ulid::Ulid::from_string(&id)
        .map(AlertId)
        .map_err(|_| ApiError::BadRequest("Invalid alert ID format. Expected ULID.".into()))?;

    let command = state.dispatcher.resolve_alert(id, &request.operator).await?;
    let message = match command {
        Some(_) => "alert resolved",
        None => "alert resolved, no edge reference to notify",
    };
    Ok(success_response(StatusCode::OK, command, Some(message.into())))
}
