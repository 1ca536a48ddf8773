//! Status and health check endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use gwg_core::config::STATUS_PATH;
use gwg_core::models::SyncOutcome;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: String,
}

#[derive(Serialize)]
struct RepoStatusResponse {
    name: String,
    path: String,
    directory: String,
    selector: String,
    running: bool,
    pending: bool,
    last_outcome: Option<SyncOutcome>,
    last_run_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct StatusResponse {
    loaded_at: DateTime<Utc>,
    uptime_secs: u64,
    repos: Vec<RepoStatusResponse>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(STATUS_PATH, get(get_status))
        .route(&format!("{}/health", STATUS_PATH), get(health_check))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let live = state.dispatcher.live().snapshot();
    let engine = state.dispatcher.engine();

    let repos = live
        .routes
        .iter()
        .map(|mapping| {
            let status = engine.status(&mapping.directory);
            RepoStatusResponse {
                name: mapping.name(),
                path: mapping.path.clone(),
                directory: mapping.directory.display().to_string(),
                selector: mapping.selector.to_string(),
                running: status.running,
                pending: status.pending,
                last_outcome: status.last_outcome,
                last_run_at: status.last_run_at,
            }
        })
        .collect();

    let uptime = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(StatusResponse {
        loaded_at: live.loaded_at,
        uptime_secs: uptime,
        repos,
    })
}

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// Simple API error type that converts to an Axum response.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    MethodNotAllowed(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (axum::http::StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (axum::http::StatusCode::NOT_FOUND, msg),
            AppError::Unauthorized(msg) => (axum::http::StatusCode::UNAUTHORIZED, msg),
            AppError::MethodNotAllowed(msg) => {
                (axum::http::StatusCode::METHOD_NOT_ALLOWED, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
