//! Card endpoints.

use crate::api::{created, done, ok, ApiError, ApiResponse};
use crate::AppState;
use atm_cards::{CardError, CardRecord, CardUpdate};
use axum::extract::{rejection::JsonRejection, Extension, Json, Path};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Request body for `POST /api/cards/list`.
///
/// Fields are taken as raw JSON so that a role of the wrong type is answered
/// like any other unknown role.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallerRequest {
    pub role: Value,
    pub customer_id: Value,
    pub employee_id: Value,
}

impl CallerRequest {
    fn role(&self) -> Result<Option<&str>, CardError> {
        match &self.role {
            Value::Null => Ok(None),
            Value::String(role) => Ok(Some(role.as_str())),
            _ => Err(CardError::Validation("invalid role".to_string())),
        }
    }
}

/// Identifiers may arrive as strings or numbers; anything else is absent.
fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Request body for `POST /api/cards/{cardId}/processing`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRequest {
    pub employee_id: String,
    pub action: String,
}

/// GET /api/cards
pub async fn list_cards_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<ApiResponse<Vec<CardRecord>>, ApiError> {
    let cards = tokio::task::spawn_blocking(move || state.cards.list_all_cards())
        .await
        .map_err(ApiError::join)??;
    Ok(ok("cards retrieved", cards))
}

/// GET /api/cards/{cardId}
pub async fn get_card_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(card_id): Path<String>,
) -> Result<ApiResponse<CardRecord>, ApiError> {
    let card = tokio::task::spawn_blocking(move || state.cards.get_card(&card_id))
        .await
        .map_err(ApiError::join)??;
    Ok(ok("card retrieved", card))
}

/// POST /api/cards/list
pub async fn list_cards_for_caller_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<CallerRequest>, JsonRejection>,
) -> Result<ApiResponse<Vec<CardRecord>>, ApiError> {
    let Json(payload) = payload?;
    let cards = tokio::task::spawn_blocking(move || {
        let role = payload.role()?;
        state.cards.list_cards_for_caller(
            role,
            identifier(&payload.customer_id).as_deref(),
            identifier(&payload.employee_id).as_deref(),
        )
    })
    .await
    .map_err(ApiError::join)??;
    Ok(ok("cards retrieved", cards))
}

/// POST /api/cards
pub async fn create_card_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<CardRecord>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(payload) = payload?;
    tokio::task::spawn_blocking(move || state.cards.create_card(&payload))
        .await
        .map_err(ApiError::join)??;
    Ok(created("card created"))
}

/// PUT /api/cards/{cardId}
pub async fn update_card_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(card_id): Path<String>,
    payload: Result<Json<CardUpdate>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(payload) = payload?;
    tokio::task::spawn_blocking(move || state.cards.update_card(&card_id, &payload))
        .await
        .map_err(ApiError::join)??;
    Ok(done("card updated"))
}

/// DELETE /api/cards/{cardId}
///
/// A failure part way through leaves the already-deleted dependents deleted.
pub async fn delete_card_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(card_id): Path<String>,
) -> Result<ApiResponse<()>, ApiError> {
    tokio::task::spawn_blocking(move || state.cards.delete_card(&card_id))
        .await
        .map_err(ApiError::join)??;
    Ok(done("card and related records deleted"))
}

/// POST /api/cards/{cardId}/processing
pub async fn record_processing_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(card_id): Path<String>,
    payload: Result<Json<ProcessingRequest>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(payload) = payload?;
    tokio::task::spawn_blocking(move || {
        state
            .cards
            .record_processing(&card_id, &payload.employee_id, &payload.action)
    })
    .await
    .map_err(ApiError::join)??;
    Ok(created("processing recorded"))
}
