use ampere_core::{CabinetId, CommandAck, CommandId};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
};

use super::error::{ApiError, internal};
use super::models::{CommandCreateRequest, success_response};
use crate::AppState;
use crate::ack::AckOutcome;
use crate::auth::authenticate;
use crate::registry::{CommandRegistry, Registries};

fn parse_command_id(id: &str) -> Result<CommandId, ApiError> {
    ulid::Ulid::from_string(id)
        .map(CommandId)
        .map_err(|_| ApiError::BadRequest("Invalid command ID format. Expected ULID.".into()))
}

/// `POST /commands/{cabinet_id}`
pub async fn send_command<R: Registries>(
    State(state): State<AppState<R>>,
    Path(cabinet): Path<CabinetId>,
    Json(request): Json<CommandCreateRequest>,
) -> Result<Response, ApiError> {
    let command = state
        .dispatcher
        .send(
            &cabinet,
            &request.command_type,
            request.payload,
            &request.created_by,
        )
        .await?;

    Ok(success_response(
        StatusCode::CREATED,
        command,
        Some("command queued".into()),
    ))
}

/// `GET /commands/{command_id}`
pub async fn get_command<R: Registries>(
    State(state): State<AppState<R>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_command_id(&id)?;

    let command = state
        .registries
        .commands()
        .get(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::NotFound(format!("command {id} not found")))?;

    Ok(success_response(StatusCode::OK, command, None))
}

/// `POST /commands/{command_id}/ack`. The bearer key identifies the sender,
/// which must own the command.
pub async fn ack_command<R: Registries>(
    State(state): State<AppState<R>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(mut ack): Json<CommandAck>,
) -> Result<Response, ApiError> {
    let cabinet = authenticate(state.registries.cabinets(), &headers).await?;

    if ack.command_id.is_empty() {
        ack.command_id = id;
    } else if ack.command_id != id {
        return Err(ApiError::BadRequest(
            "command id in body does not match path".into(),
        ));
    }

    let message = match state.acks.apply(&cabinet.id, &ack).await? {
        AckOutcome::Applied(status) => format!("command marked {}", status.as_str()),
        AckOutcome::Ignored(status) => format!("command already {}", status.as_str()),
    };
    Ok(success_response(StatusCode::OK, (), Some(message)))
}
