//! Response envelope and error mapping shared by every handler.
//!
//! Every response body has the shape `{status, message, data?}` where
//! `status` repeats the HTTP status code.

use atm_accounts::AccountError;
use atm_cards::CardError;
use atm_personnel::PersonnelError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Maps a failed `spawn_blocking` join.
    pub fn join(e: tokio::task::JoinError) -> Self {
        ApiError::InternalServerError(format!("task join error: {}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let message = match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InternalServerError(msg) => msg,
        };

        let body = Json(serde_json::json!({
            "status": status.as_u16(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

/// Malformed or mistyped request bodies are answered in the envelope too.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<CardError> for ApiError {
    fn from(e: CardError) -> Self {
        match e {
            CardError::Validation(msg) => ApiError::BadRequest(msg),
            CardError::NotFound(_) => ApiError::NotFound(e.to_string()),
            CardError::DeleteConflict { .. } | CardError::Database(_) => {
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Validation(msg) => ApiError::BadRequest(msg),
            AccountError::InvalidCredentials => ApiError::Unauthorized(e.to_string()),
            AccountError::DuplicateUsername(_) => ApiError::Conflict(e.to_string()),
            AccountError::Hashing(_) | AccountError::Database(_) => {
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

impl From<PersonnelError> for ApiError {
    fn from(e: PersonnelError) -> Self {
        match e {
            PersonnelError::Validation(msg) => ApiError::BadRequest(msg),
            PersonnelError::NotFound(_) => ApiError::NotFound(e.to_string()),
            PersonnelError::DeleteConflict { .. } | PersonnelError::Database(_) => {
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

/// Successful response body.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// A success response: status code plus envelope.
pub type ApiResponse<T> = (StatusCode, Json<Envelope<T>>);

pub fn ok<T: Serialize>(message: &str, data: T) -> ApiResponse<T> {
    respond(StatusCode::OK, message, Some(data))
}

pub fn created(message: &str) -> ApiResponse<()> {
    respond(StatusCode::CREATED, message, None)
}

pub fn done(message: &str) -> ApiResponse<()> {
    respond(StatusCode::OK, message, None)
}

fn respond<T: Serialize>(status: StatusCode, message: &str, data: Option<T>) -> ApiResponse<T> {
    (
        status,
        Json(Envelope {
            status: status.as_u16(),
            message: message.to_string(),
            data,
        }),
    )
}
