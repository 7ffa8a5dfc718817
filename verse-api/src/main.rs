//! Verse API server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use verse_api::telemetry::{init_tracer, shutdown_tracer, TelemetryConfig};
use verse_api::{
    create_api_router, ApiConfig, ApiError, ApiResult, AppState, AuthConfig, DbConfig,
    MemoryStore, PgStore, ServiceConfig, Store,
};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    let store = build_store().await?;
    let services = ServiceConfig::from_env()?;
    let state = AppState::with_default_integrations(
        store,
        AuthConfig::from_env(),
        services,
        ApiConfig::from_env(),
    )?;

    let throttle_janitor = state.throttle.spawn_janitor();
    let app: Router = create_api_router(state)?;

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting Verse API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    // Connect info feeds the per-IP throttle.
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    throttle_janitor.abort();
    shutdown_tracer();
    Ok(())
}

async fn build_store() -> ApiResult<Arc<dyn Store>> {
    let backend = std::env::var("VERSE_STORE").unwrap_or_else(|_| "postgres".to_string());
    match backend.trim().to_ascii_lowercase().as_str() {
        "memory" => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        "postgres" => {
            let store = PgStore::from_config(&DbConfig::from_env())?;
            store.migrate().await?;
            tracing::info!(pool_size = store.pool_size(), "Connected to Postgres");
            Ok(Arc::new(store))
        }
        other => Err(ApiError::invalid_input(format!(
            "VERSE_STORE must be 'postgres' or 'memory', got '{}'",
            other
        ))),
    }
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("VERSE_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("VERSE_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
