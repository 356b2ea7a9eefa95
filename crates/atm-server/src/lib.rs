//! ATM card service HTTP server library logic.

pub mod api;
pub mod api_accounts;
pub mod api_cards;
pub mod api_personnel;
pub mod config;

use atm_accounts::AccountService;
use atm_cards::CardService;
use atm_db::{Gateway, PoolManager};
use atm_personnel::EmployeeService;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
pub struct AppState {
    /// The process-wide connection pool. Handlers reach it only through the
    /// services below; it is kept here for health reporting and shutdown.
    pub db: Arc<PoolManager>,
    pub cards: CardService,
    pub accounts: AccountService,
    pub employees: EmployeeService,
}

impl AppState {
    /// Wires every service to one gateway over `db`.
    pub fn new(db: Arc<PoolManager>) -> Self {
        let gateway = Gateway::new(Arc::clone(&db));
        Self {
            db,
            cards: CardService::new(gateway.clone()),
            accounts: AccountService::new(gateway.clone()),
            employees: EmployeeService::new(gateway),
        }
    }
}

/// Maximum request body size (64 KiB).
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let pool = state.db.status().map(|s| {
        json!({
            "maxSize": s.max_size,
            "connections": s.connections,
            "idle": s.idle,
            "inUse": s.in_use,
        })
    });
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "pool": pool,
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/cards",
            get(api_cards::list_cards_handler).post(api_cards::create_card_handler),
        )
        .route(
            "/api/cards/list",
            post(api_cards::list_cards_for_caller_handler),
        )
        .route(
            "/api/cards/{cardId}",
            get(api_cards::get_card_handler)
                .put(api_cards::update_card_handler)
                .delete(api_cards::delete_card_handler),
        )
        .route(
            "/api/cards/{cardId}/processing",
            post(api_cards::record_processing_handler),
        )
        .route(
            "/api/accounts",
            get(api_accounts::list_accounts_handler).post(api_accounts::create_account_handler),
        )
        .route("/api/accounts/login", post(api_accounts::login_handler))
        .route(
            "/api/employees",
            get(api_personnel::list_employees_handler)
                .post(api_personnel::create_employee_handler),
        )
        .route(
            "/api/employees/{employeeId}",
            get(api_personnel::get_employee_handler)
                .put(api_personnel::update_employee_handler)
                .delete(api_personnel::delete_employee_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
