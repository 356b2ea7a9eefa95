//! Employee endpoints.

use crate::api::{created, done, ok, ApiError, ApiResponse};
use crate::AppState;
use atm_personnel::Employee;
use axum::extract::{rejection::JsonRejection, Extension, Json, Path};
use std::sync::Arc;

/// GET /api/employees
pub async fn list_employees_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<ApiResponse<Vec<Employee>>, ApiError> {
    let employees = tokio::task::spawn_blocking(move || state.employees.list_employees())
        .await
        .map_err(ApiError::join)??;
    Ok(ok("employees retrieved", employees))
}

/// GET /api/employees/{employeeId}
pub async fn get_employee_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(employee_id): Path<String>,
) -> Result<ApiResponse<Employee>, ApiError> {
    let employee = tokio::task::spawn_blocking(move || state.employees.get_employee(&employee_id))
        .await
        .map_err(ApiError::join)??;
    Ok(ok("employee retrieved", employee))
}

/// POST /api/employees
pub async fn create_employee_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<Employee>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(payload) = payload?;
    tokio::task::spawn_blocking(move || state.employees.create_employee(&payload))
        .await
        .map_err(ApiError::join)??;
    Ok(created("employee created"))
}

/// PUT /api/employees/{employeeId}
pub async fn update_employee_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(employee_id): Path<String>,
    payload: Result<Json<Employee>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let Json(payload) = payload?;
    tokio::task::spawn_blocking(move || state.employees.update_employee(&employee_id, &payload))
        .await
        .map_err(ApiError::join)??;
    Ok(done("employee updated"))
}

/// DELETE /api/employees/{employeeId}
pub async fn delete_employee_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(employee_id): Path<String>,
) -> Result<ApiResponse<()>, ApiError> {
    tokio::task::spawn_blocking(move || state.employees.delete_employee(&employee_id))
        .await
        .map_err(ApiError::join)??;
    Ok(done("employee deleted"))
}
