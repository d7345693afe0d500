use crate::config::ApiConfig;
use crate::object_store::{user_prefix, ImageStore};
use crate::session::SessionStore;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ImageStore>,
    pub sessions: Arc<SessionStore>,
    pub instance_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Runtime statistics
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub instance_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub active_sessions: usize,
}

/// Stored image count for one user
#[derive(Debug, Serialize)]
pub struct ImageCountResponse {
    pub user_id: i64,
    pub images: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/users/:user_id/images/count", get(user_image_count))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "photobot",
        "instance_id": state.instance_id,
    }))
}

/// Ready once the object store answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "storage": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "storage": "disconnected",
                "error": format!("{:#}", e)
            })),
        ),
    }
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        instance_id: state.instance_id,
        started_at: state.started_at,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        active_sessions: state.sessions.len(),
    })
}

#[instrument(skip(state))]
async fn user_image_count(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<ImageCountResponse>, (StatusCode, Json<ErrorResponse>)> {
    let keys = state
        .store
        .list_keys(&user_prefix(user_id))
        .await
        .map_err(|e| {
            error!(error = %e, user_id, "Failed to list images");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to list images".to_string(),
                    code: "STORAGE_ERROR".to_string(),
                }),
            )
        })?;

    Ok(Json(ImageCountResponse {
        user_id,
        images: keys.len(),
    }))
}

/// Serve the health API until `shutdown` is cancelled
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting health API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}
