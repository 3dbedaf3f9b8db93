//! Health and system info

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::Result;
use crate::router::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub engine: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine = state.docker.ping().await.is_ok();
    Json(HealthResponse {
        status: if engine { "healthy" } else { "degraded" }.to_string(),
        engine,
    })
}

#[derive(Debug, Serialize)]
pub struct SystemResponse {
    pub version: String,
    pub containers: usize,
    pub pty_sessions: usize,
    pub engine: bool,
}

pub async fn system_info(State(state): State<AppState>) -> Result<Json<SystemResponse>> {
    let containers = state.orchestrator.list().await?.len();
    Ok(Json(SystemResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        containers,
        pty_sessions: state.pty.session_count(),
        engine: state.docker.ping().await.is_ok(),
    }))
}
