use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use super::models::ApiResponse;
use crate::ack::AckError;
use crate::auth::AuthError;
use crate::dispatch::DispatchError;
use crate::ingest::IngestError;
use crate::ledger::LedgerError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::InternalServerError(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let api_response = ApiResponse::<()> {
            success: false,
            data: None,
            message: Some(message),
        };
        (status, Json(api_response)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingKey | AuthError::UnknownKey => ApiError::Unauthorized(e.to_string()),
            AuthError::WrongCabinet(_) => ApiError::Forbidden(e.to_string()),
            AuthError::Registry(_) => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::UnknownCabinet(_) | DispatchError::UnknownAlert(_) => {
                ApiError::NotFound(e.to_string())
            }
            DispatchError::UnknownCommandType(_)
            | DispatchError::EmptyLicense
            | DispatchError::AlreadyResolved(_) => ApiError::BadRequest(e.to_string()),
            DispatchError::Registry(_) => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::UnknownCabinet(_) => ApiError::NotFound(e.to_string()),
            IngestError::CabinetMismatch { .. } => ApiError::BadRequest(e.to_string()),
            IngestError::Registry(_) => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<AckError> for ApiError {
    fn from(e: AckError) -> Self {
        match e {
            AckError::InvalidCommandId(_) => ApiError::BadRequest(e.to_string()),
            AckError::UnknownCommand(_) => ApiError::NotFound(e.to_string()),
            AckError::NotOwner { .. } => ApiError::Forbidden(e.to_string()),
            AckError::Registry(_) => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::UnknownPolicy(_) | LedgerError::UnknownCabinet(_) => {
                ApiError::NotFound(e.to_string())
            }
            LedgerError::NotDevicePolicy(_) | LedgerError::NoTargets => {
                ApiError::BadRequest(e.to_string())
            }
            LedgerError::AllFailed { .. } => ApiError::BadGateway(e.to_string()),
            LedgerError::Registry(_) => ApiError::InternalServerError(e.to_string()),
        }
    }
}

/// For direct registry calls from handlers.
pub fn internal(e: impl std::error::Error) -> ApiError {
    ApiError::InternalServerError(e.to_string())
}
