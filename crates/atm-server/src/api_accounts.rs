//! Login account endpoints.

use crate::api::{created, ok, ApiError, ApiResponse};
use crate::AppState;
use atm_accounts::{LoginAccount, LoginSession, NewAccount};
use axum::extract::{rejection::JsonRejection, Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// GET /api/accounts
pub async fn list_accounts_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<ApiResponse<Vec<LoginAccount>>, ApiError> {
    let accounts = tokio::task::spawn_blocking(move || state.accounts.list_accounts())
        .await
        .map_err(ApiError::join)??;
    Ok(ok("accounts retrieved", accounts))
}

/// POST /api/accounts
pub async fn create_account_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<NewAccount>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(payload) = payload?;
    tokio::task::spawn_blocking(move || state.accounts.create_account(&payload))
        .await
        .map_err(ApiError::join)??;
    Ok(created("account created"))
}

/// POST /api/accounts/login
pub async fn login_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<ApiResponse<LoginSession>, ApiError> {
    let Json(payload) = payload?;
    let session = tokio::task::spawn_blocking(move || {
        state.accounts.login(&payload.username, &payload.password)
    })
    .await
    .map_err(ApiError::join)??;
    tracing::info!(username = %session.username, role = %session.role, "login succeeded");
    Ok(ok("login succeeded", session))
}
