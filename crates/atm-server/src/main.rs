//! ATM card service binary.
//!
//! Starts an axum HTTP server with structured logging, database initialization,
//! and graceful shutdown on SIGTERM/SIGINT.

use atm_db::PoolManager;
use atm_server::{app, config, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("ATM_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = match config::load_config(selected_config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging);

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = Arc::new(PoolManager::new(
        config.database.path.clone(),
        config.database.runtime_settings(),
    ));

    // Startup is the one place a database failure is fatal.
    let setup = {
        let pool = Arc::clone(&pool);
        tokio::task::spawn_blocking(move || -> Result<usize, String> {
            pool.initialize().map_err(|e| e.to_string())?;
            let conn = pool.acquire().map_err(|e| e.to_string())?;
            atm_db::run_migrations(&conn).map_err(|e| e.to_string())
        })
        .await
    };
    match setup {
        Ok(Ok(applied)) => {
            if applied > 0 {
                tracing::info!(count = applied, "applied database migrations");
            }
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, path = %config.database.path, "database setup failed");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "database setup task failed");
            std::process::exit(1);
        }
    }

    let app = app(AppState::new(Arc::clone(&pool)));
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting atm server");

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind address");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
    }

    let grace = config.database.shutdown_grace();
    if let Err(e) = tokio::task::spawn_blocking(move || pool.shutdown(grace)).await {
        tracing::warn!(error = %e, "database pool shutdown task failed");
    }

    tracing::info!("atm server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
