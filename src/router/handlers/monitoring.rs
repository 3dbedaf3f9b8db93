//! Monitoring config handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::database::MonitorConfigRecord;
use crate::error::Result;
use crate::monitor::MonitorStatus;
use crate::router::AppState;

pub async fn get_config(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<MonitorStatus>> {
    state.orchestrator.get(&container_id).await?;
    Ok(Json(state.monitor.status(&container_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub threshold_secs: Option<u64>,
    #[serde(default)]
    pub buffer_bytes: Option<usize>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

pub async fn update_config(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
    Json(request): Json<UpdateConfigRequest>,
) -> Result<Json<MonitorConfigRecord>> {
    state.orchestrator.get(&container_id).await?;

    let mut config = state.monitor.get_config(&container_id).await?;
    if let Some(enabled) = request.enabled {
        config.enabled = enabled;
    }
    if let Some(threshold_secs) = request.threshold_secs {
        config.threshold_secs = threshold_secs;
    }
    if let Some(buffer_bytes) = request.buffer_bytes {
        config.buffer_bytes = buffer_bytes;
    }
    if let Some(strategy) = request.strategy {
        config.strategy = strategy;
    }
    if let Some(params) = request.params {
        config.params = params;
    }

    Ok(Json(state.monitor.update_config(config).await?))
}

pub async fn enable(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<MonitorStatus>> {
    state.orchestrator.get(&container_id).await?;
    state.monitor.set_enabled(&container_id, true).await?;
    Ok(Json(state.monitor.status(&container_id).await?))
}

pub async fn disable(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> Result<Json<MonitorStatus>> {
    state.orchestrator.get(&container_id).await?;
    state.monitor.set_enabled(&container_id, false).await?;
    Ok(Json(state.monitor.status(&container_id).await?))
}
