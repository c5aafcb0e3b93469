//! HTTP surface: router assembly, health check and serving

pub mod response;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

use crate::config::Config;
use crate::error::AppError;
use crate::features;
use crate::import::ImportPipeline;
use crate::middleware;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: ImportPipeline,
}

/// Build the application router with all routes and middleware
pub fn create_router(state: AppState, config: &Config) -> Router {
    let feature_routes = features::router(features::FeatureState {
        pipeline: state.pipeline.clone(),
    });

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1", feature_routes)
        // Apply layers from innermost to outermost
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::body_limit_layer(config.server.max_upload_bytes))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Bind and serve until a shutdown signal arrives
pub async fn serve(state: AppState, config: &Config) -> anyhow::Result<()> {
    let app = create_router(state, config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "gradeload",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Result<Response, AppError> {
    match state.pipeline.store.ping().await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "datastore": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Datastore health check failed: {:?}", e);
            Err(AppError::Unavailable("datastore unreachable".to_string()))
        }
    }
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
